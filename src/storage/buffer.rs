//! LRU buffer pool.
//!
//! Caches page frames by block address. All page access in the engine goes
//! through `fetch`, which moves the frame to the most-recently-used position
//! and, under capacity pressure, evicts the least-recently-used frame,
//! writing it back when dirty.

use hashlink::LinkedHashMap;
use tracing::debug;

use crate::common::errors::{DbError, DbResult};
use crate::common::BlockAddress;
use crate::storage::disk::DiskStorage;
use crate::storage::page::Page;

#[derive(Debug)]
struct Frame {
    page: Page,
    dirty: bool,
}

/// Outcome of a fetch: a handle to the cached page plus observability data.
pub struct Fetched<'a> {
    pub page: &'a mut Page,
    pub was_hit: bool,
    pub evicted: Option<BlockAddress>,
}

#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    frames: LinkedHashMap<BlockAddress, Frame>,
    disk: DiskStorage,
    hits: u64,
    misses: u64,
}

impl BufferPool {
    /// The pool takes ownership of the disk layer; every component above
    /// reaches the disk through the pool.
    pub fn new(capacity: usize, disk: DiskStorage) -> DbResult<Self> {
        if capacity == 0 {
            return Err(DbError::CapacityExceeded(
                "buffer pool needs at least one frame".into(),
            ));
        }
        Ok(Self {
            capacity,
            frames: LinkedHashMap::new(),
            disk,
            hits: 0,
            misses: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn disk(&self) -> &DiskStorage {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut DiskStorage {
        &mut self.disk
    }

    /// Fetches the page at `addr`, reading it from disk on a miss. Marking
    /// `for_write` dirties the frame. The returned frame is the most recently
    /// used; a frame evicted to make room is reported back to the caller.
    pub fn fetch(&mut self, addr: &BlockAddress, for_write: bool) -> DbResult<Fetched<'_>> {
        let mut evicted = None;
        let was_hit = self.frames.contains_key(addr);
        if was_hit {
            self.hits += 1;
            // Move-to-back keeps the recency order: front is the LRU victim.
            if let Some(frame) = self.frames.remove(addr) {
                self.frames.insert(addr.clone(), frame);
            }
        } else {
            self.misses += 1;
            if self.frames.len() >= self.capacity {
                evicted = self.evict_lru()?;
            }
            let bytes = self.disk.read(addr)?;
            let page = Page::from_bytes(&bytes)?;
            self.frames
                .insert(addr.clone(), Frame { page, dirty: false });
        }
        let frame = self.frames.get_mut(addr).expect("frame just ensured");
        if for_write {
            frame.dirty = true;
        }
        Ok(Fetched {
            page: &mut frame.page,
            was_hit,
            evicted,
        })
    }

    fn evict_lru(&mut self) -> DbResult<Option<BlockAddress>> {
        let Some((addr, frame)) = self.frames.pop_front() else {
            return Ok(None);
        };
        if frame.dirty {
            debug!(block = %addr, "writing back dirty frame on eviction");
            self.disk.write(&addr, &frame.page.to_bytes())?;
        }
        Ok(Some(addr))
    }

    /// Writes back every dirty frame, keeping them cached.
    pub fn flush(&mut self) -> DbResult<()> {
        let dirty: Vec<BlockAddress> = self
            .frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(a, _)| a.clone())
            .collect();
        for addr in dirty {
            let frame = self.frames.get_mut(&addr).expect("dirty frame present");
            self.disk.write(&addr, &frame.page.to_bytes())?;
            frame.dirty = false;
        }
        Ok(())
    }
}
