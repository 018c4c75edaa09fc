//! Slotted variable-length page.
//!
//! A page is a fixed-size byte region: a header, a slot directory growing
//! upward after it, and a record heap growing downward from the end. Slot ids
//! are stable across updates; erasing tombstones the slot and leaves the
//! region reserved until `vacuum` compacts the heap.

use crate::common::errors::{DbError, DbResult};
use crate::common::Record;

/// On-disk magic ("SPG1") and format version.
const PAGE_MAGIC: u32 = 0x5350_4731;
const PAGE_VERSION: u16 = 1;

/// Fixed header: magic u32, version u16, active u16, deleted u16,
/// slot_count u16, free-space hint u32, heap start u32.
pub const PAGE_HEADER_BYTES: usize = 20;
/// Slot directory entry: offset u32, length u32, flags u16.
pub const SLOT_OVERHEAD_BYTES: usize = 10;
/// Record header: column count u32, payload length u32.
pub const RECORD_HEADER_BYTES: usize = 8;

const FLAG_FREE: u16 = 0;
const FLAG_ACTIVE: u16 = 1;
const FLAG_TOMBSTONE: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Slot {
    offset: u32,
    length: u32,
    flags: u16,
}

impl Slot {
    fn free() -> Self {
        Self {
            offset: 0,
            length: 0,
            flags: FLAG_FREE,
        }
    }
}

/// Result of a vacuum pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumStats {
    pub cleared_slots: usize,
    pub reclaimed_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct Page {
    capacity: usize,
    data: Vec<u8>,
    slots: Vec<Slot>,
    heap_start: usize,
    active: usize,
    deleted: usize,
}

impl Page {
    /// Creates an empty page with the given fixed capacity.
    pub fn new(capacity: usize) -> DbResult<Self> {
        if capacity < PAGE_HEADER_BYTES + SLOT_OVERHEAD_BYTES + RECORD_HEADER_BYTES {
            return Err(DbError::InvalidArgument(format!(
                "page capacity {} is too small",
                capacity
            )));
        }
        Ok(Self {
            capacity,
            data: vec![0; capacity],
            slots: Vec::new(),
            heap_start: capacity,
            active: 0,
            deleted: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Bytes consumed by the header, the slot directory and the heap.
    pub fn used_bytes(&self) -> usize {
        PAGE_HEADER_BYTES + self.slots.len() * SLOT_OVERHEAD_BYTES + (self.capacity - self.heap_start)
    }

    /// Contiguous space between the slot directory and the heap.
    pub fn free_space(&self) -> usize {
        let dir_end = PAGE_HEADER_BYTES + self.slots.len() * SLOT_OVERHEAD_BYTES;
        self.heap_start.saturating_sub(dir_end)
    }

    /// Serialized footprint of `record` inside the heap.
    pub fn estimate_payload(record: &Record) -> usize {
        RECORD_HEADER_BYTES + record.values.iter().map(|v| 4 + v.len()).sum::<usize>()
    }

    /// Conservative lower-bound check: either a tombstoned region fits the
    /// payload, or the free gap fits payload plus a fresh slot entry.
    pub fn has_space_for(&self, record: &Record) -> bool {
        let payload = Self::estimate_payload(record);
        if self
            .slots
            .iter()
            .any(|s| s.flags == FLAG_TOMBSTONE && s.length as usize >= payload)
        {
            return true;
        }
        self.free_space() >= payload + SLOT_OVERHEAD_BYTES
    }

    /// Inserts a record, reusing a tombstoned slot whose region fits before
    /// appending a new one. Returns the slot id, or `None` when the page has
    /// no room.
    pub fn insert(&mut self, record: &Record) -> Option<usize> {
        let payload = Self::estimate_payload(record);
        let encoded = encode_record(record);
        debug_assert_eq!(encoded.len(), payload);

        // Prefer the smallest tombstoned region that still fits.
        let reuse = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.flags == FLAG_TOMBSTONE && s.length as usize >= payload)
            .min_by_key(|(_, s)| s.length)
            .map(|(i, _)| i);
        if let Some(slot_id) = reuse {
            let offset = self.slots[slot_id].offset as usize;
            self.data[offset..offset + payload].copy_from_slice(&encoded);
            self.slots[slot_id].flags = FLAG_ACTIVE;
            self.active += 1;
            self.deleted -= 1;
            return Some(slot_id);
        }

        if self.free_space() < payload + SLOT_OVERHEAD_BYTES {
            return None;
        }
        let offset = self.heap_start - payload;
        self.data[offset..offset + payload].copy_from_slice(&encoded);
        self.heap_start = offset;
        self.slots.push(Slot {
            offset: offset as u32,
            length: payload as u32,
            flags: FLAG_ACTIVE,
        });
        self.active += 1;
        Some(self.slots.len() - 1)
    }

    /// Returns the record stored at `slot`, or `None` when the slot does not
    /// exist or is tombstoned.
    pub fn get(&self, slot: usize) -> Option<Record> {
        let entry = self.slots.get(slot)?;
        if entry.flags != FLAG_ACTIVE {
            return None;
        }
        decode_record(&self.data[entry.offset as usize..]).ok()
    }

    /// Calls `visit` for every active slot in directory order.
    pub fn for_each_record(&self, mut visit: impl FnMut(usize, Record)) {
        for (i, entry) in self.slots.iter().enumerate() {
            if entry.flags != FLAG_ACTIVE {
                continue;
            }
            if let Ok(record) = decode_record(&self.data[entry.offset as usize..]) {
                visit(i, record);
            }
        }
    }

    /// Rewrites the record at `slot`. In place when the new payload fits the
    /// existing region; otherwise re-allocated within this page. `Ok(false)`
    /// means the slot is absent or tombstoned; `CapacityExceeded` means the
    /// page cannot hold the new image (never silently moves across pages).
    pub fn update(&mut self, slot: usize, record: &Record) -> DbResult<bool> {
        let Some(entry) = self.slots.get(slot).copied() else {
            return Ok(false);
        };
        if entry.flags != FLAG_ACTIVE {
            return Ok(false);
        }
        let payload = Self::estimate_payload(record);
        let encoded = encode_record(record);
        if payload <= entry.length as usize {
            let offset = entry.offset as usize;
            self.data[offset..offset + payload].copy_from_slice(&encoded);
            return Ok(true);
        }
        // Relocate: the old region becomes dead space until vacuum.
        if self.free_space() < payload {
            return Err(DbError::CapacityExceeded(format!(
                "updated record needs {} bytes, page has {}",
                payload,
                self.free_space()
            )));
        }
        let offset = self.heap_start - payload;
        self.data[offset..offset + payload].copy_from_slice(&encoded);
        self.heap_start = offset;
        self.slots[slot] = Slot {
            offset: offset as u32,
            length: payload as u32,
            flags: FLAG_ACTIVE,
        };
        Ok(true)
    }

    /// Tombstones the slot. The region stays reserved until vacuum.
    pub fn erase(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry) if entry.flags == FLAG_ACTIVE => {
                entry.flags = FLAG_TOMBSTONE;
                self.active -= 1;
                self.deleted += 1;
                true
            }
            _ => false,
        }
    }

    /// Resurrects a tombstoned slot whose region was not reused. Used by
    /// rollback to undo a delete in place.
    pub fn restore(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry) if entry.flags == FLAG_TOMBSTONE => {
                entry.flags = FLAG_ACTIVE;
                self.active += 1;
                self.deleted -= 1;
                true
            }
            _ => false,
        }
    }

    /// Compacts live payloads toward the end of the page, rewrites slot
    /// offsets, clears tombstones to free slots and drops trailing free
    /// entries. No-op when the page has no tombstones.
    pub fn vacuum(&mut self) -> VacuumStats {
        let mut stats = VacuumStats::default();
        if self.deleted == 0 {
            return stats;
        }

        let before_used = self.used_bytes();

        // Clear tombstones first so only live regions get copied.
        for entry in &mut self.slots {
            if entry.flags == FLAG_TOMBSTONE {
                *entry = Slot::free();
                stats.cleared_slots += 1;
            }
        }
        self.deleted = 0;

        // Slide live payloads toward the end, highest offset first, so the
        // copies never overlap their destinations.
        let mut order: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].flags == FLAG_ACTIVE)
            .collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.slots[i].offset));

        let mut destination = self.capacity;
        for i in order {
            let entry = self.slots[i];
            let len = entry.length as usize;
            destination -= len;
            let src = entry.offset as usize;
            self.data.copy_within(src..src + len, destination);
            self.slots[i].offset = destination as u32;
        }
        self.heap_start = destination;

        while matches!(self.slots.last(), Some(s) if s.flags == FLAG_FREE) {
            self.slots.pop();
        }

        stats.reclaimed_bytes = before_used.saturating_sub(self.used_bytes());
        stats
    }

    /// Serializes the page into its stable on-disk image.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.capacity];
        out[0..4].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&PAGE_VERSION.to_le_bytes());
        out[6..8].copy_from_slice(&(self.active as u16).to_le_bytes());
        out[8..10].copy_from_slice(&(self.deleted as u16).to_le_bytes());
        out[10..12].copy_from_slice(&(self.slots.len() as u16).to_le_bytes());
        out[12..16].copy_from_slice(&(self.free_space() as u32).to_le_bytes());
        out[16..20].copy_from_slice(&(self.heap_start as u32).to_le_bytes());
        let mut cursor = PAGE_HEADER_BYTES;
        for slot in &self.slots {
            out[cursor..cursor + 4].copy_from_slice(&slot.offset.to_le_bytes());
            out[cursor + 4..cursor + 8].copy_from_slice(&slot.length.to_le_bytes());
            out[cursor + 8..cursor + 10].copy_from_slice(&slot.flags.to_le_bytes());
            cursor += SLOT_OVERHEAD_BYTES;
        }
        out[self.heap_start..].copy_from_slice(&self.data[self.heap_start..]);
        out
    }

    /// Parses a page image, validating magic, version and the slot directory.
    pub fn from_bytes(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < PAGE_HEADER_BYTES {
            return Err(DbError::Corrupted("page image shorter than header".into()));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != PAGE_MAGIC {
            return Err(DbError::Corrupted(format!(
                "bad page magic {:#010x}",
                magic
            )));
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if version != PAGE_VERSION {
            return Err(DbError::Corrupted(format!(
                "unsupported page version {}",
                version
            )));
        }
        let active = u16::from_le_bytes(bytes[6..8].try_into().unwrap()) as usize;
        let deleted = u16::from_le_bytes(bytes[8..10].try_into().unwrap()) as usize;
        let slot_count = u16::from_le_bytes(bytes[10..12].try_into().unwrap()) as usize;
        let heap_start = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        let capacity = bytes.len();

        let dir_end = PAGE_HEADER_BYTES + slot_count * SLOT_OVERHEAD_BYTES;
        if dir_end > capacity || heap_start > capacity || heap_start < dir_end {
            return Err(DbError::Corrupted("inconsistent page geometry".into()));
        }

        let mut slots = Vec::with_capacity(slot_count);
        let mut cursor = PAGE_HEADER_BYTES;
        for _ in 0..slot_count {
            let offset = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
            let length = u32::from_le_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap());
            let flags = u16::from_le_bytes(bytes[cursor + 8..cursor + 10].try_into().unwrap());
            if flags != FLAG_FREE {
                let end = offset as usize + length as usize;
                if (offset as usize) < heap_start || end > capacity {
                    return Err(DbError::Corrupted(format!(
                        "slot region {}..{} out of range",
                        offset, end
                    )));
                }
            }
            slots.push(Slot {
                offset,
                length,
                flags,
            });
            cursor += SLOT_OVERHEAD_BYTES;
        }

        let counted_active = slots.iter().filter(|s| s.flags == FLAG_ACTIVE).count();
        let counted_deleted = slots.iter().filter(|s| s.flags == FLAG_TOMBSTONE).count();
        if counted_active != active || counted_deleted != deleted {
            return Err(DbError::Corrupted(
                "slot directory disagrees with header counts".into(),
            ));
        }

        // Active regions must not overlap.
        let mut regions: Vec<(usize, usize)> = slots
            .iter()
            .filter(|s| s.flags != FLAG_FREE)
            .map(|s| (s.offset as usize, s.offset as usize + s.length as usize))
            .collect();
        regions.sort_unstable();
        for pair in regions.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(DbError::Corrupted("overlapping slot regions".into()));
            }
        }

        Ok(Self {
            capacity,
            data: bytes.to_vec(),
            slots,
            heap_start,
            active,
            deleted,
        })
    }
}

fn encode_record(record: &Record) -> Vec<u8> {
    let payload: usize = record.values.iter().map(|v| 4 + v.len()).sum();
    let mut out = Vec::with_capacity(RECORD_HEADER_BYTES + payload);
    out.extend_from_slice(&(record.values.len() as u32).to_le_bytes());
    out.extend_from_slice(&(payload as u32).to_le_bytes());
    for value in &record.values {
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

fn decode_record(bytes: &[u8]) -> DbResult<Record> {
    if bytes.len() < RECORD_HEADER_BYTES {
        return Err(DbError::Corrupted("record header truncated".into()));
    }
    let columns = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let payload = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    if bytes.len() < RECORD_HEADER_BYTES + payload {
        return Err(DbError::Corrupted("record payload truncated".into()));
    }
    let mut values = Vec::with_capacity(columns);
    let mut cursor = RECORD_HEADER_BYTES;
    for _ in 0..columns {
        if cursor + 4 > bytes.len() {
            return Err(DbError::Corrupted("record value header truncated".into()));
        }
        let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + len > bytes.len() {
            return Err(DbError::Corrupted("record value truncated".into()));
        }
        let value = String::from_utf8(bytes[cursor..cursor + len].to_vec())
            .map_err(|_| DbError::Corrupted("record value is not valid UTF-8".into()))?;
        values.push(value);
        cursor += len;
    }
    Ok(Record::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn record(values: &[&str]) -> Record {
        Record::from_strs(values)
    }

    #[test]
    fn insert_get_roundtrip() {
        let mut page = Page::new(256).unwrap();
        let slot = page.insert(&record(&["1", "alice"])).unwrap();
        assert_eq!(page.get(slot).unwrap().values, vec!["1", "alice"]);
        assert_eq!(page.active_count(), 1);
    }

    #[test]
    fn insert_fails_when_full_and_leaves_page_unchanged() {
        let mut page = Page::new(96).unwrap();
        let big = record(&["xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"]);
        let first = page.insert(&big);
        assert!(first.is_some());
        let used = page.used_bytes();
        assert!(page.insert(&big).is_none());
        assert_eq!(page.used_bytes(), used);
    }

    #[test]
    fn erase_tombstones_and_reuses_slot_id() {
        let mut page = Page::new(256).unwrap();
        let a = page.insert(&record(&["aaaa"])).unwrap();
        let b = page.insert(&record(&["bbbb"])).unwrap();
        assert!(page.erase(a));
        assert_eq!(page.deleted_count(), 1);
        assert!(page.get(a).is_none());
        // Same-size record goes back into the tombstoned region.
        let c = page.insert(&record(&["cccc"])).unwrap();
        assert_eq!(c, a);
        assert_eq!(page.get(b).unwrap().values, vec!["bbbb"]);
        assert_eq!(page.deleted_count(), 0);
    }

    #[test]
    fn update_in_place_and_relocated() {
        let mut page = Page::new(256).unwrap();
        let slot = page.insert(&record(&["hello world"])).unwrap();
        assert!(page.update(slot, &record(&["hi"])).unwrap());
        assert_eq!(page.get(slot).unwrap().values, vec!["hi"]);
        // Larger than the original region: relocated within the page.
        assert!(page.update(slot, &record(&["a much longer value here"])).unwrap());
        assert_eq!(
            page.get(slot).unwrap().values,
            vec!["a much longer value here"]
        );
    }

    #[test]
    fn update_reports_no_space_without_moving() {
        let mut page = Page::new(110).unwrap();
        let slot = page.insert(&record(&["abcd"])).unwrap();
        let giant = record(&["yyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyy"]);
        let err = page.update(slot, &giant).unwrap_err();
        assert!(matches!(err, DbError::CapacityExceeded(_)));
        assert_eq!(page.get(slot).unwrap().values, vec!["abcd"]);
    }

    #[test]
    fn restore_resurrects_until_region_reused() {
        let mut page = Page::new(256).unwrap();
        let slot = page.insert(&record(&["keepme"])).unwrap();
        assert!(page.erase(slot));
        assert!(page.restore(slot));
        assert_eq!(page.get(slot).unwrap().values, vec!["keepme"]);
        assert!(page.erase(slot));
        let reused = page.insert(&record(&["newone"])).unwrap();
        assert_eq!(reused, slot);
        assert!(!page.restore(slot));
    }

    #[test]
    fn vacuum_reclaims_dead_space_and_is_idempotent() {
        let mut page = Page::new(512).unwrap();
        let mut slots = Vec::new();
        for i in 0..8 {
            slots.push(page.insert(&record(&[&format!("value-{i}")])).unwrap());
        }
        page.erase(slots[1]);
        page.erase(slots[4]);
        page.erase(slots[6]);
        let used_before = page.used_bytes();
        let stats = page.vacuum();
        assert_eq!(stats.cleared_slots, 3);
        assert!(page.used_bytes() <= used_before);
        assert_eq!(page.deleted_count(), 0);
        for (i, &slot) in slots.iter().enumerate() {
            if i == 1 || i == 4 || i == 6 {
                assert!(page.get(slot).is_none());
            } else {
                assert_eq!(page.get(slot).unwrap().values, vec![format!("value-{i}")]);
            }
        }
        // No tombstones left: a second pass must change nothing.
        let snapshot = page.to_bytes();
        assert_eq!(page.vacuum(), VacuumStats::default());
        assert_eq!(page.to_bytes(), snapshot);
    }

    #[test]
    fn serialization_roundtrip_preserves_records() {
        let mut page = Page::new(512).unwrap();
        page.insert(&record(&["1", "alice", "30"])).unwrap();
        page.insert(&record(&["2", "bob", "42"])).unwrap();
        page.erase(0);
        let bytes = page.to_bytes();
        assert_eq!(bytes.len(), 512);
        let reloaded = Page::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.active_count(), 1);
        assert_eq!(reloaded.deleted_count(), 1);
        assert_eq!(reloaded.get(1).unwrap().values, vec!["2", "bob", "42"]);
        assert!(reloaded.get(0).is_none());
    }

    #[test]
    fn from_bytes_rejects_bad_magic() {
        let page = Page::new(128).unwrap();
        let mut bytes = page.to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            Page::from_bytes(&bytes),
            Err(DbError::Corrupted(_))
        ));
    }

    #[test]
    fn from_bytes_rejects_out_of_range_slot() {
        let mut page = Page::new(128).unwrap();
        page.insert(&record(&["abc"])).unwrap();
        let mut bytes = page.to_bytes();
        // Corrupt the first slot's offset to point past the page.
        bytes[PAGE_HEADER_BYTES..PAGE_HEADER_BYTES + 4]
            .copy_from_slice(&(1000u32).to_le_bytes());
        assert!(matches!(
            Page::from_bytes(&bytes),
            Err(DbError::Corrupted(_))
        ));
    }

    #[test]
    fn active_count_matches_visible_records_under_random_ops() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut page = Page::new(1024).unwrap();
        let mut live: Vec<usize> = Vec::new();
        for round in 0..400 {
            if rng.gen_bool(0.6) {
                let text = format!("row-{round}-{}", rng.gen_range(0..1000));
                if let Some(slot) = page.insert(&record(&[&text])) {
                    live.push(slot);
                }
            } else if let Some(pick) = live.pop() {
                assert!(page.erase(pick));
            }
            if round % 97 == 0 {
                page.vacuum();
            }
            let visible = (0..page.slot_count())
                .filter(|&s| page.get(s).is_some())
                .count();
            assert_eq!(visible, page.active_count());
        }
    }
}
