//! In-memory B+ tree keyed by fixed-length string prefixes.
//!
//! Nodes form an arena addressed by integer ids; child links, next-leaf links
//! and the root are ids, never pointers. The tree persists to a textual
//! `IDXTREE V1` file and reloads only when page size and key length match.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::common::errors::{DbError, DbResult};
use crate::common::hex::{decode_hex, encode_hex};
use crate::common::{BlockAddress, IndexPointer};

const FILE_HEADER: &str = "IDXTREE V1";
const NODE_HEADER_BYTES: usize = 32;
const ENTRY_POINTER_BYTES: usize = 12;

#[derive(Debug, Clone, Default)]
struct Node {
    id: usize,
    leaf: bool,
    keys: Vec<String>,
    values: Vec<IndexPointer>,
    children: Vec<usize>,
    next_leaf: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeleteState {
    NotFound,
    Balanced,
    NeedsRebalance,
}

#[derive(Debug, Default)]
pub struct BPlusTree {
    nodes: HashMap<usize, Node>,
    root: Option<usize>,
    next_node_id: usize,
    max_keys: usize,
    min_keys: usize,
    page_size: usize,
    key_length: usize,
}

impl BPlusTree {
    pub fn new(page_size: usize, key_length: usize) -> Self {
        let mut tree = Self::default();
        tree.initialize(page_size, key_length);
        tree
    }

    /// Configures node fan-out from the page geometry:
    /// maxKeys = max(3, (pageSize - 32) / (keyLength + 12)), minKeys = max(1, maxKeys / 2).
    pub fn initialize(&mut self, page_size: usize, key_length: usize) {
        self.page_size = page_size;
        self.key_length = key_length;
        let per_entry = key_length + ENTRY_POINTER_BYTES;
        self.max_keys = if page_size <= NODE_HEADER_BYTES {
            3
        } else {
            ((page_size - NODE_HEADER_BYTES) / per_entry.max(1)).max(3)
        };
        self.min_keys = (self.max_keys / 2).max(1);
        self.clear();
    }

    pub fn entries_per_page(&self) -> usize {
        self.max_keys
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.next_node_id = 1;
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none() || self.nodes.is_empty()
    }

    fn create_node(&mut self, leaf: bool) -> usize {
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                leaf,
                ..Node::default()
            },
        );
        id
    }

    fn ensure_root(&mut self) -> DbResult<usize> {
        if self.max_keys == 0 {
            return Err(DbError::Logic("B+ tree used before initialize".into()));
        }
        if let Some(root) = self.root {
            return Ok(root);
        }
        let id = self.create_node(true);
        self.root = Some(id);
        Ok(id)
    }

    /// Clears the tree, sorts the entries by key and loads them in order.
    /// Later entries for an equal key overwrite earlier ones.
    pub fn bulk_insert(&mut self, entries: &[(String, IndexPointer)]) -> DbResult<()> {
        self.clear();
        if entries.is_empty() {
            return Ok(());
        }
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, ptr) in sorted {
            self.insert_or_assign(&key, ptr)?;
        }
        Ok(())
    }

    /// Inserts a key, failing with `Conflict` when it already exists.
    pub fn insert_unique(&mut self, key: &str, ptr: IndexPointer) -> DbResult<()> {
        let root = self.ensure_root()?;
        if let Some(split) = self.insert_recursive(root, key, ptr, true)? {
            self.promote_to_new_root(split);
        }
        Ok(())
    }

    /// Inserts a key, overwriting the pointer in place on duplicates.
    pub fn insert_or_assign(&mut self, key: &str, ptr: IndexPointer) -> DbResult<()> {
        let root = self.ensure_root()?;
        if let Some(split) = self.insert_recursive(root, key, ptr, false)? {
            self.promote_to_new_root(split);
        }
        Ok(())
    }

    /// Repoints an existing key. Returns false when the key is absent.
    pub fn update(&mut self, key: &str, ptr: IndexPointer) -> bool {
        let Some(root) = self.root else {
            return false;
        };
        let leaf_id = self.locate_leaf(root, key);
        let leaf = self.nodes.get_mut(&leaf_id).expect("leaf exists");
        match leaf.keys.binary_search_by(|k| k.as_str().cmp(key)) {
            Ok(idx) => {
                leaf.values[idx] = ptr;
                true
            }
            Err(_) => false,
        }
    }

    pub fn find(&self, key: &str) -> Option<IndexPointer> {
        let root = self.root?;
        let leaf_id = self.locate_leaf(root, key);
        let leaf = self.nodes.get(&leaf_id)?;
        match leaf.keys.binary_search_by(|k| k.as_str().cmp(key)) {
            Ok(idx) => Some(leaf.values[idx].clone()),
            Err(_) => None,
        }
    }

    /// Removes a key, rebalancing on underflow. Returns false when absent.
    pub fn erase(&mut self, key: &str) -> bool {
        let Some(root) = self.root else {
            return false;
        };
        let state = self.erase_recursive(root, key);
        if state == DeleteState::NotFound {
            return false;
        }
        self.collapse_root();
        true
    }

    /// When the root is an internal node left with a single child, that child
    /// becomes the new root.
    fn collapse_root(&mut self) {
        let Some(root_id) = self.root else {
            return;
        };
        let Some(root) = self.nodes.get(&root_id) else {
            return;
        };
        if !root.leaf && root.keys.is_empty() && root.children.len() == 1 {
            let only_child = root.children[0];
            self.nodes.remove(&root_id);
            self.root = Some(only_child);
        }
    }

    fn locate_leaf(&self, node_id: usize, key: &str) -> usize {
        let node = &self.nodes[&node_id];
        if node.leaf {
            return node_id;
        }
        let child_idx = Self::find_child_index(node, key);
        self.locate_leaf(node.children[child_idx], key)
    }

    /// Index of the child subtree that covers `key`: the first key strictly
    /// greater than it.
    fn find_child_index(node: &Node, key: &str) -> usize {
        node.keys.partition_point(|k| k.as_str() <= key)
    }

    fn insert_recursive(
        &mut self,
        node_id: usize,
        key: &str,
        ptr: IndexPointer,
        fail_on_duplicate: bool,
    ) -> DbResult<Option<(String, usize)>> {
        if self.nodes[&node_id].leaf {
            let max_keys = self.max_keys;
            let node = self.nodes.get_mut(&node_id).expect("leaf exists");
            match node.keys.binary_search_by(|k| k.as_str().cmp(key)) {
                Ok(idx) => {
                    if fail_on_duplicate {
                        return Err(DbError::Conflict(format!("duplicate index key '{}'", key)));
                    }
                    node.values[idx] = ptr;
                    return Ok(None);
                }
                Err(idx) => {
                    node.keys.insert(idx, key.to_string());
                    node.values.insert(idx, ptr);
                }
            }
            if self.nodes[&node_id].keys.len() > max_keys {
                return Ok(Some(self.split_leaf(node_id)));
            }
            return Ok(None);
        }

        let (child_pos, child_id) = {
            let node = &self.nodes[&node_id];
            let pos = Self::find_child_index(node, key);
            (pos, node.children[pos])
        };
        let Some((promoted, new_child)) =
            self.insert_recursive(child_id, key, ptr, fail_on_duplicate)?
        else {
            return Ok(None);
        };
        let max_keys = self.max_keys;
        let node = self.nodes.get_mut(&node_id).expect("internal exists");
        node.keys.insert(child_pos, promoted);
        node.children.insert(child_pos + 1, new_child);
        if node.keys.len() > max_keys {
            return Ok(Some(self.split_internal(node_id)));
        }
        Ok(None)
    }

    fn promote_to_new_root(&mut self, split: (String, usize)) {
        let old_root = self.root.expect("split implies a root");
        let new_root = self.create_node(false);
        let node = self.nodes.get_mut(&new_root).expect("new root exists");
        node.keys.push(split.0);
        node.children.push(old_root);
        node.children.push(split.1);
        self.root = Some(new_root);
    }

    /// Copies the right half to a new leaf, links it as the next leaf and
    /// promotes the right leaf's first key.
    fn split_leaf(&mut self, node_id: usize) -> (String, usize) {
        let new_id = self.create_node(true);
        let (right_keys, right_values, old_next) = {
            let node = self.nodes.get_mut(&node_id).expect("leaf exists");
            let mid = node.keys.len() / 2;
            let keys = node.keys.split_off(mid);
            let values = node.values.split_off(mid);
            let next = node.next_leaf.replace(new_id);
            (keys, values, next)
        };
        let right = self.nodes.get_mut(&new_id).expect("new leaf exists");
        right.keys = right_keys;
        right.values = right_values;
        right.next_leaf = old_next;
        (right.keys[0].clone(), new_id)
    }

    /// Promotes the median key and moves keys/children right of it into a new
    /// internal node.
    fn split_internal(&mut self, node_id: usize) -> (String, usize) {
        let new_id = self.create_node(false);
        let (promote, right_keys, right_children) = {
            let node = self.nodes.get_mut(&node_id).expect("internal exists");
            let mid = node.keys.len() / 2;
            let right_keys = node.keys.split_off(mid + 1);
            let promote = node.keys.pop().expect("median key");
            let right_children = node.children.split_off(mid + 1);
            (promote, right_keys, right_children)
        };
        let right = self.nodes.get_mut(&new_id).expect("new internal exists");
        right.keys = right_keys;
        right.children = right_children;
        (promote, new_id)
    }

    fn erase_recursive(&mut self, node_id: usize, key: &str) -> DeleteState {
        if self.nodes[&node_id].leaf {
            let node = self.nodes.get_mut(&node_id).expect("leaf exists");
            let Ok(idx) = node.keys.binary_search_by(|k| k.as_str().cmp(key)) else {
                return DeleteState::NotFound;
            };
            node.keys.remove(idx);
            node.values.remove(idx);
            if Some(node_id) == self.root {
                return DeleteState::Balanced;
            }
            return if self.nodes[&node_id].keys.len() < self.min_keys {
                DeleteState::NeedsRebalance
            } else {
                DeleteState::Balanced
            };
        }

        let (child_index, child_id) = {
            let node = &self.nodes[&node_id];
            let mut idx = Self::find_child_index(node, key);
            if idx >= node.children.len() {
                idx = node.children.len() - 1;
            }
            (idx, node.children[idx])
        };
        let state = self.erase_recursive(child_id, key);
        if state == DeleteState::NotFound {
            return DeleteState::NotFound;
        }
        if state == DeleteState::NeedsRebalance {
            self.rebalance_child(node_id, child_index);
        }
        if Some(node_id) == self.root {
            self.collapse_root();
            return DeleteState::Balanced;
        }
        if self.nodes[&node_id].keys.len() < self.min_keys {
            DeleteState::NeedsRebalance
        } else {
            DeleteState::Balanced
        }
    }

    /// Restores the invariant for an underflowing child: borrow from the left
    /// sibling, then the right sibling, then merge with the left (or with the
    /// right when the child is leftmost).
    fn rebalance_child(&mut self, parent_id: usize, child_index: usize) {
        let (children_len, child_index) = {
            let parent = &self.nodes[&parent_id];
            if parent.children.is_empty() {
                return;
            }
            let idx = child_index.min(parent.children.len() - 1);
            (parent.children.len(), idx)
        };
        let child_id = self.nodes[&parent_id].children[child_index];
        let child_is_leaf = self.nodes[&child_id].leaf;

        if child_index > 0 {
            let left_id = self.nodes[&parent_id].children[child_index - 1];
            if self.nodes[&left_id].keys.len() > self.min_keys {
                if child_is_leaf {
                    self.borrow_from_left_leaf(parent_id, child_index);
                } else {
                    self.borrow_from_left_internal(parent_id, child_index);
                }
                return;
            }
        }
        if child_index + 1 < children_len {
            let right_id = self.nodes[&parent_id].children[child_index + 1];
            if self.nodes[&right_id].keys.len() > self.min_keys {
                if child_is_leaf {
                    self.borrow_from_right_leaf(parent_id, child_index);
                } else {
                    self.borrow_from_right_internal(parent_id, child_index);
                }
                return;
            }
        }
        let merge_at = if child_index > 0 {
            child_index - 1
        } else if children_len >= 2 {
            0
        } else {
            return;
        };
        if child_is_leaf {
            self.merge_leaves(parent_id, merge_at);
        } else {
            self.merge_internal(parent_id, merge_at);
        }
    }

    fn borrow_from_left_leaf(&mut self, parent_id: usize, child_index: usize) {
        let left_id = self.nodes[&parent_id].children[child_index - 1];
        let child_id = self.nodes[&parent_id].children[child_index];
        let (key, value) = {
            let left = self.nodes.get_mut(&left_id).expect("left leaf");
            (left.keys.pop().expect("donor key"), left.values.pop().expect("donor value"))
        };
        let separator = {
            let child = self.nodes.get_mut(&child_id).expect("child leaf");
            child.keys.insert(0, key);
            child.values.insert(0, value);
            child.keys[0].clone()
        };
        self.nodes.get_mut(&parent_id).expect("parent").keys[child_index - 1] = separator;
    }

    fn borrow_from_right_leaf(&mut self, parent_id: usize, child_index: usize) {
        let right_id = self.nodes[&parent_id].children[child_index + 1];
        let child_id = self.nodes[&parent_id].children[child_index];
        let (key, value, new_first) = {
            let right = self.nodes.get_mut(&right_id).expect("right leaf");
            let key = right.keys.remove(0);
            let value = right.values.remove(0);
            (key, value, right.keys[0].clone())
        };
        {
            let child = self.nodes.get_mut(&child_id).expect("child leaf");
            child.keys.push(key);
            child.values.push(value);
        }
        self.nodes.get_mut(&parent_id).expect("parent").keys[child_index] = new_first;
    }

    fn merge_leaves(&mut self, parent_id: usize, left_index: usize) {
        let (left_id, right_id) = {
            let parent = &self.nodes[&parent_id];
            if left_index + 1 >= parent.children.len() {
                return;
            }
            (parent.children[left_index], parent.children[left_index + 1])
        };
        let right = self.nodes.remove(&right_id).expect("right leaf");
        let left = self.nodes.get_mut(&left_id).expect("left leaf");
        left.keys.extend(right.keys);
        left.values.extend(right.values);
        left.next_leaf = right.next_leaf;
        let parent = self.nodes.get_mut(&parent_id).expect("parent");
        parent.keys.remove(left_index);
        parent.children.remove(left_index + 1);
    }

    fn borrow_from_left_internal(&mut self, parent_id: usize, child_index: usize) {
        let left_id = self.nodes[&parent_id].children[child_index - 1];
        let child_id = self.nodes[&parent_id].children[child_index];
        let (donor_key, donor_child) = {
            let left = self.nodes.get_mut(&left_id).expect("left internal");
            (left.keys.pop().expect("donor key"), left.children.pop().expect("donor child"))
        };
        let separator = {
            let parent = self.nodes.get_mut(&parent_id).expect("parent");
            std::mem::replace(&mut parent.keys[child_index - 1], donor_key)
        };
        let child = self.nodes.get_mut(&child_id).expect("child internal");
        child.keys.insert(0, separator);
        child.children.insert(0, donor_child);
    }

    fn borrow_from_right_internal(&mut self, parent_id: usize, child_index: usize) {
        let right_id = self.nodes[&parent_id].children[child_index + 1];
        let child_id = self.nodes[&parent_id].children[child_index];
        let (donor_key, donor_child) = {
            let right = self.nodes.get_mut(&right_id).expect("right internal");
            (right.keys.remove(0), right.children.remove(0))
        };
        let separator = {
            let parent = self.nodes.get_mut(&parent_id).expect("parent");
            std::mem::replace(&mut parent.keys[child_index], donor_key)
        };
        let child = self.nodes.get_mut(&child_id).expect("child internal");
        child.keys.push(separator);
        child.children.push(donor_child);
    }

    fn merge_internal(&mut self, parent_id: usize, left_index: usize) {
        let (left_id, right_id, separator) = {
            let parent = &self.nodes[&parent_id];
            if left_index + 1 >= parent.children.len() {
                return;
            }
            (
                parent.children[left_index],
                parent.children[left_index + 1],
                parent.keys[left_index].clone(),
            )
        };
        let right = self.nodes.remove(&right_id).expect("right internal");
        let left = self.nodes.get_mut(&left_id).expect("left internal");
        left.keys.push(separator);
        left.keys.extend(right.keys);
        left.children.extend(right.children);
        let parent = self.nodes.get_mut(&parent_id).expect("parent");
        parent.keys.remove(left_index);
        parent.children.remove(left_index + 1);
    }

    /// Breadth-first textual dump of the node pages, suitable for tests and
    /// for the `describe index` surface.
    pub fn describe_pages(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Index file: {} page(s), max {} entry/entries per page.",
            self.nodes.len(),
            self.max_keys
        )];
        let Some(root) = self.root else {
            lines.push("  [empty tree]".into());
            return lines;
        };
        if self.nodes.is_empty() {
            lines.push("  [empty tree]".into());
            return lines;
        }
        let mut bfs = VecDeque::new();
        bfs.push_back((root, 0usize));
        while let Some((node_id, level)) = bfs.pop_front() {
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            let mut meta = format!(
                "  Page #{} (level {}, {}",
                node.id,
                level,
                if node.leaf { "leaf" } else { "internal" }
            );
            if node_id == root {
                meta.push_str(", root");
            }
            meta.push_str(&format!(") keys={}", node.keys.len()));
            lines.push(meta);

            let keys = if node.keys.is_empty() {
                "[]".to_string()
            } else {
                node.keys
                    .iter()
                    .map(|k| format!("[{}]", k))
                    .collect::<Vec<_>>()
                    .join(" | ")
            };
            lines.push(format!("    Keys: {}", keys));

            if node.leaf {
                let pointers = if node.values.is_empty() {
                    "[]".to_string()
                } else {
                    node.values
                        .iter()
                        .map(|p| p.to_string())
                        .collect::<Vec<_>>()
                        .join(" | ")
                };
                lines.push(format!("    Pointers: {}", pointers));
                if let Some(next) = node.next_leaf {
                    lines.push(format!("    Next leaf -> #{}", next));
                }
            } else {
                let children = node
                    .children
                    .iter()
                    .map(|c| format!("#{}", c))
                    .collect::<Vec<_>>()
                    .join(" | ");
                lines.push(format!("    Children: {}", children));
                for &child in &node.children {
                    bfs.push_back((child, level + 1));
                }
            }
        }
        lines
    }

    /// Persists the tree in the stable `IDXTREE V1` text format. Nodes are
    /// written in ascending id order.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> DbResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        out.push_str(FILE_HEADER);
        out.push('\n');
        out.push_str(&format!("PAGE_SIZE {}\n", self.page_size));
        out.push_str(&format!("KEY_LENGTH {}\n", self.key_length));
        out.push_str(&format!(
            "ROOT {}\n",
            self.root.map(|r| r as i64).unwrap_or(-1)
        ));
        out.push_str(&format!("NEXT {}\n", self.next_node_id));
        out.push_str(&format!("NODE_COUNT {}\n", self.nodes.len()));

        let mut order: Vec<usize> = self.nodes.keys().copied().collect();
        order.sort_unstable();
        for id in order {
            let node = &self.nodes[&id];
            out.push_str(&format!(
                "NODE {} {} {} {}\n",
                node.id,
                if node.leaf { 1 } else { 0 },
                if node.next_leaf.is_some() { 1 } else { 0 },
                node.next_leaf.map(|n| n as i64).unwrap_or(-1)
            ));
            out.push_str(&format!("KEYS {}\n", node.keys.len()));
            for key in &node.keys {
                out.push_str(&encode_hex(key));
                out.push('\n');
            }
            if node.leaf {
                out.push_str(&format!("VALUES {}\n", node.values.len()));
                for value in &node.values {
                    out.push_str(&format!(
                        "{} {} {}\n",
                        encode_hex(&value.address.table),
                        value.address.index,
                        value.slot
                    ));
                }
            } else {
                out.push_str(&format!("CHILDREN {}\n", node.children.len()));
                for child in &node.children {
                    out.push_str(&format!("{}\n", child));
                }
            }
        }
        let mut file = File::create(path)?;
        file.write_all(out.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Reloads a persisted tree, rejecting a mismatched page size or key
    /// length and any corrupted node descriptor.
    pub fn load_from_file(
        &mut self,
        path: impl AsRef<Path>,
        expected_page_size: usize,
        expected_key_length: usize,
    ) -> DbResult<()> {
        let file = File::open(path.as_ref())?;
        let mut lines = BufReader::new(file).lines();
        let mut read_line = |context: &str| -> DbResult<String> {
            match lines.next() {
                Some(Ok(line)) => Ok(line.trim_end_matches('\r').to_string()),
                Some(Err(e)) => Err(DbError::Io(e)),
                None => Err(DbError::Corrupted(format!(
                    "index file missing {}",
                    context
                ))),
            }
        };

        if read_line("header")? != FILE_HEADER {
            return Err(DbError::Corrupted("unsupported index format".into()));
        }
        let page_size = parse_tagged(&read_line("page size")?, "PAGE_SIZE")?;
        if page_size != expected_page_size as i64 {
            return Err(DbError::Corrupted("index page size mismatch".into()));
        }
        let key_length = parse_tagged(&read_line("key length")?, "KEY_LENGTH")?;
        if key_length != expected_key_length as i64 {
            return Err(DbError::Corrupted("index key length mismatch".into()));
        }
        let root = parse_tagged(&read_line("root")?, "ROOT")?;
        let next = parse_tagged(&read_line("next node id")?, "NEXT")?;
        let count = parse_tagged(&read_line("node count")?, "NODE_COUNT")?;

        self.initialize(expected_page_size, expected_key_length);
        self.next_node_id = next as usize;
        self.root = if root < 0 { None } else { Some(root as usize) };

        for _ in 0..count {
            let descriptor = read_line("node descriptor")?;
            let parts: Vec<&str> = descriptor.split_whitespace().collect();
            if parts.len() != 5 || parts[0] != "NODE" {
                return Err(DbError::Corrupted("corrupted index node descriptor".into()));
            }
            let id: usize = parts[1]
                .parse()
                .map_err(|_| DbError::Corrupted("bad node id".into()))?;
            let leaf = parts[2] == "1";
            let has_next = parts[3] == "1";
            let next_raw: i64 = parts[4]
                .parse()
                .map_err(|_| DbError::Corrupted("bad next-leaf id".into()))?;
            let mut node = Node {
                id,
                leaf,
                next_leaf: if has_next && next_raw >= 0 {
                    Some(next_raw as usize)
                } else {
                    None
                },
                ..Node::default()
            };

            let key_count = parse_tagged(&read_line("keys header")?, "KEYS")?;
            for _ in 0..key_count {
                node.keys.push(decode_hex(&read_line("key entry")?)?);
            }

            if leaf {
                let value_count = parse_tagged(&read_line("values header")?, "VALUES")?;
                for _ in 0..value_count {
                    let line = read_line("value entry")?;
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if fields.len() != 3 {
                        return Err(DbError::Corrupted("corrupted index pointer entry".into()));
                    }
                    let table = decode_hex(fields[0])?;
                    let block: usize = fields[1]
                        .parse()
                        .map_err(|_| DbError::Corrupted("bad block index".into()))?;
                    let slot: usize = fields[2]
                        .parse()
                        .map_err(|_| DbError::Corrupted("bad slot index".into()))?;
                    node.values.push(IndexPointer {
                        address: BlockAddress::new(table, block),
                        slot,
                    });
                }
            } else {
                let child_count = parse_tagged(&read_line("children header")?, "CHILDREN")?;
                for _ in 0..child_count {
                    let child: usize = read_line("child entry")?
                        .trim()
                        .parse()
                        .map_err(|_| DbError::Corrupted("bad child id".into()))?;
                    node.children.push(child);
                }
            }
            self.nodes.insert(id, node);
        }
        if self.nodes.is_empty() {
            self.root = None;
        }
        Ok(())
    }
}

fn parse_tagged(line: &str, tag: &str) -> DbResult<i64> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(found), Some(value)) if found == tag => value
            .parse()
            .map_err(|_| DbError::Corrupted(format!("bad value for '{}'", tag))),
        _ => Err(DbError::Corrupted(format!(
            "corrupted header expecting '{}'",
            tag
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(block: usize, slot: usize) -> IndexPointer {
        IndexPointer {
            address: BlockAddress::new("t", block),
            slot,
        }
    }

    /// Small pages force max_keys down to the floor of 3, exercising splits.
    fn tiny_tree() -> BPlusTree {
        BPlusTree::new(40, 4)
    }

    #[test]
    fn fanout_formula() {
        let tree = BPlusTree::new(4096, 16);
        assert_eq!(tree.entries_per_page(), (4096 - 32) / (16 + 12));
        let floor = BPlusTree::new(16, 16);
        assert_eq!(floor.entries_per_page(), 3);
    }

    #[test]
    fn insert_find_erase() {
        let mut tree = tiny_tree();
        for (i, key) in ["ada", "bob", "cyd", "dee", "eve", "fay", "gil"].iter().enumerate() {
            tree.insert_unique(key, ptr(0, i)).unwrap();
        }
        assert_eq!(tree.find("dee"), Some(ptr(0, 3)));
        assert_eq!(tree.find("zzz"), None);
        assert!(tree.erase("dee"));
        assert!(!tree.erase("dee"));
        assert_eq!(tree.find("dee"), None);
        // Everything else survives the rebalancing.
        for (i, key) in ["ada", "bob", "cyd", "eve", "fay", "gil"].iter().enumerate() {
            let expected = if i < 3 { i } else { i + 1 };
            assert_eq!(tree.find(key), Some(ptr(0, expected)), "key {}", key);
        }
    }

    #[test]
    fn insert_unique_rejects_duplicates() {
        let mut tree = tiny_tree();
        tree.insert_unique("key", ptr(0, 0)).unwrap();
        assert!(matches!(
            tree.insert_unique("key", ptr(0, 1)),
            Err(DbError::Conflict(_))
        ));
        // The original pointer is untouched.
        assert_eq!(tree.find("key"), Some(ptr(0, 0)));
    }

    #[test]
    fn insert_or_assign_overwrites() {
        let mut tree = tiny_tree();
        tree.insert_or_assign("key", ptr(0, 0)).unwrap();
        tree.insert_or_assign("key", ptr(2, 5)).unwrap();
        assert_eq!(tree.find("key"), Some(ptr(2, 5)));
    }

    #[test]
    fn update_requires_existing_key() {
        let mut tree = tiny_tree();
        assert!(!tree.update("ghost", ptr(0, 0)));
        tree.insert_unique("real", ptr(0, 0)).unwrap();
        assert!(tree.update("real", ptr(1, 1)));
        assert_eq!(tree.find("real"), Some(ptr(1, 1)));
    }

    #[test]
    fn bulk_insert_sorts_and_replaces_state() {
        let mut tree = tiny_tree();
        tree.insert_unique("old", ptr(9, 9)).unwrap();
        let entries: Vec<(String, IndexPointer)> = (0..20)
            .rev()
            .map(|i| (format!("k{:02}", i), ptr(0, i)))
            .collect();
        tree.bulk_insert(&entries).unwrap();
        assert_eq!(tree.find("old"), None);
        for i in 0..20 {
            assert_eq!(tree.find(&format!("k{:02}", i)), Some(ptr(0, i)));
        }
    }

    #[test]
    fn root_collapses_after_mass_deletion() {
        let mut tree = tiny_tree();
        let keys: Vec<String> = (0..30).map(|i| format!("key{:02}", i)).collect();
        for (i, key) in keys.iter().enumerate() {
            tree.insert_unique(key, ptr(0, i)).unwrap();
        }
        for key in keys.iter().take(29) {
            assert!(tree.erase(key), "erase {}", key);
        }
        assert_eq!(tree.find("key29"), Some(ptr(0, 29)));
        // A single live key fits in a single leaf root.
        let dump = tree.describe_pages();
        assert!(dump[1].contains("leaf, root"), "dump: {:?}", dump);
    }

    #[test]
    fn save_load_roundtrip_is_describe_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.tree");
        let mut tree = tiny_tree();
        for i in 0..25 {
            tree.insert_unique(&format!("row{:02}", i), ptr(i / 7, i % 7))
                .unwrap();
        }
        tree.erase("row03");
        tree.save_to_file(&path).unwrap();

        let mut reloaded = BPlusTree::default();
        reloaded.load_from_file(&path, 40, 4).unwrap();
        assert_eq!(reloaded.describe_pages(), tree.describe_pages());
        assert_eq!(reloaded.find("row08"), Some(ptr(1, 1)));
    }

    #[test]
    fn load_rejects_mismatched_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.tree");
        let tree = tiny_tree();
        tree.save_to_file(&path).unwrap();
        let mut other = BPlusTree::default();
        assert!(matches!(
            other.load_from_file(&path, 41, 4),
            Err(DbError::Corrupted(_))
        ));
        assert!(matches!(
            other.load_from_file(&path, 40, 5),
            Err(DbError::Corrupted(_))
        ));
    }

    #[test]
    fn load_rejects_corrupted_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.tree");
        let mut tree = tiny_tree();
        tree.insert_unique("abc", ptr(0, 0)).unwrap();
        tree.save_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path)
            .unwrap()
            .replace("NODE 1", "XODE 1");
        std::fs::write(&path, text).unwrap();
        let mut other = BPlusTree::default();
        assert!(matches!(
            other.load_from_file(&path, 40, 4),
            Err(DbError::Corrupted(_))
        ));
    }

    #[test]
    fn randomized_inserts_and_erases_stay_consistent() {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(13);
        let mut tree = BPlusTree::new(64, 6);
        let mut keys: Vec<String> = (0..200).map(|i| format!("k{:03}", i)).collect();
        keys.shuffle(&mut rng);
        for (i, key) in keys.iter().enumerate() {
            tree.insert_unique(key, ptr(0, i)).unwrap();
        }
        keys.shuffle(&mut rng);
        let (gone, kept) = keys.split_at(120);
        for key in gone {
            assert!(tree.erase(key), "erase {}", key);
        }
        for key in gone {
            assert_eq!(tree.find(key), None);
        }
        for key in kept {
            assert!(tree.find(key).is_some(), "find {}", key);
        }
    }
}
