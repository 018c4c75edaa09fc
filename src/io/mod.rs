//! Durability and observability files: the write-ahead log, the operation
//! log buffer and the access-plan cache.

pub mod logs;
pub mod wal;

pub use logs::{AccessPlanCache, LogBuffer};
pub use wal::{WalEntry, WalEntryType, WriteAheadLog};
