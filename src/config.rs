use std::path::{Path, PathBuf};

use crate::common::errors::{DbError, DbResult};

/// Default block/page size of the engine (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;
/// Smallest block size the slotted page format supports.
pub const MIN_BLOCK_SIZE: usize = 64;

/// Fraction of main memory reserved for the access-plan cache.
const PLAN_CACHE_FRACTION: f64 = 0.15;
/// Fraction of main memory reserved for the data dictionary.
const DICTIONARY_FRACTION: f64 = 0.15;
/// Fraction of main memory reserved for the operation log buffer.
const LOG_BUFFER_FRACTION: f64 = 0.10;

/// Engine configuration. Sizes are in bytes; the buffer pool capacity in
/// frames and the disk capacity in blocks are derived from them.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub block_size: usize,
    pub main_memory_bytes: usize,
    pub disk_bytes: usize,
    pub storage_root: PathBuf,
}

impl DbConfig {
    pub fn new(
        block_size: usize,
        main_memory_bytes: usize,
        disk_bytes: usize,
        storage_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            block_size,
            main_memory_bytes,
            disk_bytes,
            storage_root: storage_root.as_ref().to_path_buf(),
        }
    }

    pub(crate) fn validate(&self) -> DbResult<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "block size {} is below the minimum of {}",
                self.block_size, MIN_BLOCK_SIZE
            )));
        }
        if self.main_memory_bytes < self.block_size {
            return Err(DbError::InvalidArgument(
                "main memory must hold at least one block".into(),
            ));
        }
        if self.disk_bytes == 0 {
            return Err(DbError::InvalidArgument(
                "disk capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Number of page-sized blocks the disk budget allows (at least one).
    pub(crate) fn disk_blocks(&self) -> usize {
        if self.disk_bytes < self.block_size {
            1
        } else {
            self.disk_bytes / self.block_size
        }
    }

    /// Splits main memory into the fixed partitions used by the engine.
    pub(crate) fn partitions(&self) -> MemoryPartitions {
        let plan_cache = (self.main_memory_bytes as f64 * PLAN_CACHE_FRACTION) as usize;
        let dictionary = (self.main_memory_bytes as f64 * DICTIONARY_FRACTION) as usize;
        let log_buffer = (self.main_memory_bytes as f64 * LOG_BUFFER_FRACTION) as usize;
        let mut data_buffer = self
            .main_memory_bytes
            .saturating_sub(plan_cache + dictionary + log_buffer);
        if data_buffer < self.block_size {
            data_buffer = self.block_size;
        }
        MemoryPartitions {
            plan_cache,
            dictionary,
            log_buffer,
            data_buffer,
        }
    }

    /// Buffer pool capacity in frames (at least one).
    pub(crate) fn buffer_frames(&self) -> usize {
        let frames = self.partitions().data_buffer / self.block_size;
        frames.max(1)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MemoryPartitions {
    pub plan_cache: usize,
    pub dictionary: usize,
    pub log_buffer: usize,
    pub data_buffer: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_leave_at_least_one_block_for_data() {
        let cfg = DbConfig::new(1024, 2048, 1 << 20, "/tmp/strata");
        let parts = cfg.partitions();
        assert!(parts.data_buffer >= cfg.block_size);
        assert_eq!(cfg.buffer_frames(), parts.data_buffer / cfg.block_size);
    }

    #[test]
    fn rejects_undersized_memory() {
        let cfg = DbConfig::new(4096, 1024, 1 << 20, "/tmp/strata");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn disk_blocks_rounds_down_but_never_to_zero() {
        let cfg = DbConfig::new(4096, 1 << 20, 10 * 4096 + 17, "/tmp/strata");
        assert_eq!(cfg.disk_blocks(), 10);
        let tiny = DbConfig::new(4096, 1 << 20, 100, "/tmp/strata");
        assert_eq!(tiny.disk_blocks(), 1);
    }
}
