//! Secondary indexes: a B+ tree keyed on a fixed-length prefix of one column.

pub mod btree;

use std::path::Path;

use crate::common::errors::DbResult;
use crate::common::{slice_index_key, BlockAddress, IndexPointer, Record};
use btree::BPlusTree;

/// Catalog-level description of an index, persisted in `indexes.meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub table_name: String,
    pub column_name: String,
    pub column_index: usize,
    pub key_length: usize,
    pub unique: bool,
}

/// A B+ tree bound to an index definition. Key derivation and entry
/// maintenance live here; the tree itself only sees opaque string keys.
#[derive(Debug)]
pub struct BPlusTreeIndex {
    definition: IndexDefinition,
    tree: BPlusTree,
}

impl BPlusTreeIndex {
    pub fn new(definition: IndexDefinition, page_size: usize) -> Self {
        let tree = BPlusTree::new(page_size, definition.key_length);
        Self { definition, tree }
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn entries_per_page(&self) -> usize {
        self.tree.entries_per_page()
    }

    /// Key for `record` under this index; empty keys are never stored.
    pub fn project_key(&self, record: &Record) -> String {
        slice_index_key(
            record,
            self.definition.column_index,
            self.definition.key_length,
        )
    }

    /// Replaces the tree contents with `entries` (sorted and bulk-loaded).
    pub fn rebuild(&mut self, entries: &[(String, IndexPointer)]) -> DbResult<()> {
        self.tree.bulk_insert(entries)
    }

    pub fn insert_record(
        &mut self,
        record: &Record,
        addr: &BlockAddress,
        slot: usize,
    ) -> DbResult<()> {
        let key = self.project_key(record);
        if key.is_empty() {
            return Ok(());
        }
        let ptr = IndexPointer {
            address: addr.clone(),
            slot,
        };
        if self.definition.unique {
            self.tree.insert_unique(&key, ptr)
        } else {
            self.tree.insert_or_assign(&key, ptr)
        }
    }

    /// Moves the entry for a mutated row: repoints in place when the key is
    /// unchanged, otherwise erases the old key and inserts the new one.
    pub fn update_record(
        &mut self,
        before: &Record,
        after: &Record,
        addr: &BlockAddress,
        slot: usize,
    ) -> DbResult<()> {
        let old_key = self.project_key(before);
        let new_key = self.project_key(after);
        let ptr = IndexPointer {
            address: addr.clone(),
            slot,
        };
        if old_key == new_key {
            if !new_key.is_empty() {
                self.tree.update(&new_key, ptr);
            }
            return Ok(());
        }
        if !old_key.is_empty() {
            self.tree.erase(&old_key);
        }
        if new_key.is_empty() {
            return Ok(());
        }
        if self.definition.unique {
            self.tree.insert_unique(&new_key, ptr)
        } else {
            self.tree.insert_or_assign(&new_key, ptr)
        }
    }

    pub fn delete_record(&mut self, record: &Record) {
        let key = self.project_key(record);
        if !key.is_empty() {
            self.tree.erase(&key);
        }
    }

    pub fn find(&self, key: &str) -> Option<IndexPointer> {
        self.tree.find(key)
    }

    pub fn describe_pages(&self) -> Vec<String> {
        self.tree.describe_pages()
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> DbResult<()> {
        self.tree.save_to_file(path)
    }

    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> DbResult<()> {
        let page_size = self.tree.page_size();
        self.tree
            .load_from_file(path, page_size, self.definition.key_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(unique: bool) -> IndexDefinition {
        IndexDefinition {
            name: "idx_users_name".into(),
            table_name: "users".into(),
            column_name: "name".into(),
            column_index: 1,
            key_length: 8,
            unique,
        }
    }

    #[test]
    fn maintains_entries_across_mutations() {
        let mut index = BPlusTreeIndex::new(definition(false), 4096);
        let addr = BlockAddress::new("users", 0);
        let alice = Record::from_strs(&["1", "alice"]);
        let bob = Record::from_strs(&["2", "bob"]);
        index.insert_record(&alice, &addr, 0).unwrap();
        index.insert_record(&bob, &addr, 1).unwrap();
        assert_eq!(index.find("alice").unwrap().slot, 0);

        let bobby = Record::from_strs(&["2", "bobby"]);
        index.update_record(&bob, &bobby, &addr, 1).unwrap();
        assert!(index.find("bob").is_none());
        assert_eq!(index.find("bobby").unwrap().slot, 1);

        index.delete_record(&alice);
        assert!(index.find("alice").is_none());
    }

    #[test]
    fn unique_index_rejects_second_key() {
        let mut index = BPlusTreeIndex::new(definition(true), 4096);
        let addr = BlockAddress::new("users", 0);
        index
            .insert_record(&Record::from_strs(&["1", "dup"]), &addr, 0)
            .unwrap();
        assert!(index
            .insert_record(&Record::from_strs(&["2", "dup"]), &addr, 1)
            .is_err());
    }

    #[test]
    fn empty_projection_is_not_indexed() {
        let mut index = BPlusTreeIndex::new(definition(false), 4096);
        let addr = BlockAddress::new("users", 0);
        index
            .insert_record(&Record::from_strs(&["1", ""]), &addr, 0)
            .unwrap();
        assert!(index.find("").is_none());
    }

    #[test]
    fn keys_are_column_prefixes() {
        let index = BPlusTreeIndex::new(definition(false), 4096);
        let rec = Record::from_strs(&["1", "abcdefghijkl"]);
        assert_eq!(index.project_key(&rec), "abcdefgh");
    }
}
