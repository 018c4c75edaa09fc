//! Per-table block files under a storage root.
//!
//! Each table owns a directory; block `n` of a table is a file
//! `block_<n>.blk` of exactly the configured page size.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::common::errors::{DbError, DbResult};
use crate::common::BlockAddress;
use crate::storage::page::Page;

/// A block recovered from disk at startup.
#[derive(Debug, Clone)]
pub struct ExistingBlock {
    pub address: BlockAddress,
    pub record_count: usize,
}

#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    block_size: usize,
    total_blocks: usize,
    allocated: HashMap<String, usize>,
}

impl DiskStorage {
    pub fn new(total_blocks: usize, root: impl AsRef<Path>, block_size: usize) -> DbResult<Self> {
        if total_blocks == 0 || block_size == 0 {
            return Err(DbError::InvalidArgument(
                "disk capacity and block size must be positive".into(),
            ));
        }
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            block_size,
            total_blocks,
            allocated: HashMap::new(),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    pub fn free_blocks(&self) -> usize {
        let used: usize = self.allocated.values().sum();
        self.total_blocks.saturating_sub(used)
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    fn block_path(&self, addr: &BlockAddress) -> PathBuf {
        self.table_dir(&addr.table)
            .join(format!("block_{}.blk", addr.index))
    }

    /// Allocates the next block for `table` and materializes an empty page
    /// image for it. Fails with `CapacityExceeded` when the disk budget is
    /// spent.
    pub fn allocate_block(&mut self, table: &str) -> DbResult<BlockAddress> {
        if self.free_blocks() == 0 {
            return Err(DbError::CapacityExceeded(format!(
                "disk is full ({} blocks allocated)",
                self.total_blocks
            )));
        }
        let next = self.allocated.entry(table.to_string()).or_insert(0);
        let addr = BlockAddress::new(table, *next);
        *next += 1;
        fs::create_dir_all(self.table_dir(table))?;
        let page = Page::new(self.block_size)?;
        self.write(&addr, &page.to_bytes())?;
        Ok(addr)
    }

    /// Scans a table directory for previously allocated blocks, in index
    /// order, counting the active records of each. Files with unparseable
    /// names are skipped with a warning; a block that fails page validation
    /// is a fatal `Corrupted` error.
    pub fn load_existing_blocks(&mut self, table: &str) -> DbResult<Vec<ExistingBlock>> {
        let dir = self.table_dir(table);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut indexes = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let parsed = name
                .strip_prefix("block_")
                .and_then(|rest| rest.strip_suffix(".blk"))
                .and_then(|digits| digits.parse::<usize>().ok());
            match parsed {
                Some(index) => indexes.push(index),
                None => warn!(table, file = %name, "skipping unrecognized file in table directory"),
            }
        }
        indexes.sort_unstable();

        let mut blocks = Vec::with_capacity(indexes.len());
        for index in indexes {
            let addr = BlockAddress::new(table, index);
            let bytes = self.read(&addr)?;
            let page = Page::from_bytes(&bytes).map_err(|e| {
                DbError::Corrupted(format!("block {} failed validation: {}", addr, e))
            })?;
            blocks.push(ExistingBlock {
                address: addr,
                record_count: page.active_count(),
            });
        }
        self.allocated
            .insert(table.to_string(), blocks.len());
        Ok(blocks)
    }

    pub fn contains(&self, addr: &BlockAddress) -> bool {
        self.block_path(addr).is_file()
    }

    /// Reads the full page image of a block.
    pub fn read(&self, addr: &BlockAddress) -> DbResult<Vec<u8>> {
        let path = self.block_path(addr);
        let mut file = File::open(&path).map_err(|e| {
            DbError::Io(std::io::Error::new(
                e.kind(),
                format!("block {}: {}", addr, e),
            ))
        })?;
        let mut bytes = Vec::with_capacity(self.block_size);
        file.read_to_end(&mut bytes)?;
        if bytes.len() != self.block_size {
            return Err(DbError::Corrupted(format!(
                "block {} is {} bytes, expected {}",
                addr,
                bytes.len(),
                self.block_size
            )));
        }
        Ok(bytes)
    }

    /// Writes a byte-exact page image for a block.
    pub fn write(&self, addr: &BlockAddress, bytes: &[u8]) -> DbResult<()> {
        if bytes.len() != self.block_size {
            return Err(DbError::InvalidArgument(format!(
                "page image is {} bytes, block size is {}",
                bytes.len(),
                self.block_size
            )));
        }
        let path = self.block_path(addr);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }
}
