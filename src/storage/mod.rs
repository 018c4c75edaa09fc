//! Physical storage: the slotted page format, per-table block files on disk
//! and the LRU buffer pool that mediates all page access.

pub mod buffer;
pub mod disk;
pub mod page;

pub use buffer::{BufferPool, Fetched};
pub use disk::DiskStorage;
pub use page::{Page, RECORD_HEADER_BYTES, SLOT_OVERHEAD_BYTES};
