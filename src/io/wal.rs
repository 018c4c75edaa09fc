//! Write-ahead log.
//!
//! Line-oriented text file of typed entries. Every append is flushed and
//! synced before the caller proceeds; the entry order on disk defines the
//! replay order during crash recovery.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::common::errors::{DbError, DbResult};
use crate::common::hex::{decode_hex, encode_hex};
use crate::common::{BlockAddress, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalEntryType {
    Begin,
    Commit,
    Rollback,
    Insert,
    Update,
    Delete,
}

impl WalEntryType {
    fn tag(&self) -> &'static str {
        match self {
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    fn parse(tag: &str) -> DbResult<Self> {
        match tag {
            "BEGIN" => Ok(Self::Begin),
            "COMMIT" => Ok(Self::Commit),
            "ROLLBACK" => Ok(Self::Rollback),
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(DbError::Corrupted(format!("unknown WAL tag '{}'", other))),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub entry_type: WalEntryType,
    pub txn_id: u64,
    pub address: Option<BlockAddress>,
    pub slot: usize,
    pub before: Option<Record>,
    pub after: Option<Record>,
}

impl WalEntry {
    fn control(entry_type: WalEntryType, txn_id: u64) -> Self {
        Self {
            entry_type,
            txn_id,
            address: None,
            slot: 0,
            before: None,
            after: None,
        }
    }

    fn to_line(&self) -> String {
        match &self.address {
            None => format!("{}|{}", self.entry_type.tag(), self.txn_id),
            Some(addr) => format!(
                "{}|{}|{}|{}|{}|{}|{}",
                self.entry_type.tag(),
                self.txn_id,
                addr.table,
                addr.index,
                self.slot,
                encode_record_field(self.before.as_ref()),
                encode_record_field(self.after.as_ref()),
            ),
        }
    }

    fn from_line(line: &str) -> DbResult<Self> {
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 2 {
            return Err(DbError::Corrupted(format!("short WAL line '{}'", line)));
        }
        let entry_type = WalEntryType::parse(fields[0])?;
        let txn_id: u64 = fields[1]
            .parse()
            .map_err(|_| DbError::Corrupted("bad WAL txn id".into()))?;
        if !entry_type.is_data() {
            return Ok(Self::control(entry_type, txn_id));
        }
        if fields.len() != 7 {
            return Err(DbError::Corrupted(format!(
                "WAL data entry with {} fields",
                fields.len()
            )));
        }
        let block: usize = fields[3]
            .parse()
            .map_err(|_| DbError::Corrupted("bad WAL block index".into()))?;
        let slot: usize = fields[4]
            .parse()
            .map_err(|_| DbError::Corrupted("bad WAL slot".into()))?;
        Ok(Self {
            entry_type,
            txn_id,
            address: Some(BlockAddress::new(fields[2], block)),
            slot,
            before: decode_record_field(fields[5])?,
            after: decode_record_field(fields[6])?,
        })
    }
}

fn encode_record_field(record: Option<&Record>) -> String {
    match record {
        None => "-".to_string(),
        Some(record) => record
            .values
            .iter()
            .map(|v| encode_hex(v))
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn decode_record_field(field: &str) -> DbResult<Option<Record>> {
    if field == "-" {
        return Ok(None);
    }
    if field.is_empty() {
        return Ok(Some(Record::default()));
    }
    let mut values = Vec::new();
    for part in field.split(',') {
        values.push(decode_hex(part)?);
    }
    Ok(Some(Record::new(values)))
}

#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
}

impl WriteAheadLog {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Appends one entry; the write is flushed and synced before returning.
    pub fn append(&mut self, entry: &WalEntry) -> DbResult<()> {
        let mut line = entry.to_line();
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn log_begin(&mut self, txn_id: u64) -> DbResult<()> {
        self.append(&WalEntry::control(WalEntryType::Begin, txn_id))
    }

    pub fn log_commit(&mut self, txn_id: u64) -> DbResult<()> {
        self.append(&WalEntry::control(WalEntryType::Commit, txn_id))
    }

    pub fn log_rollback(&mut self, txn_id: u64) -> DbResult<()> {
        self.append(&WalEntry::control(WalEntryType::Rollback, txn_id))
    }

    pub fn log_insert(
        &mut self,
        txn_id: u64,
        addr: &BlockAddress,
        slot: usize,
        after: &Record,
    ) -> DbResult<()> {
        self.append(&WalEntry {
            entry_type: WalEntryType::Insert,
            txn_id,
            address: Some(addr.clone()),
            slot,
            before: None,
            after: Some(after.clone()),
        })
    }

    pub fn log_update(
        &mut self,
        txn_id: u64,
        addr: &BlockAddress,
        slot: usize,
        before: &Record,
        after: &Record,
    ) -> DbResult<()> {
        self.append(&WalEntry {
            entry_type: WalEntryType::Update,
            txn_id,
            address: Some(addr.clone()),
            slot,
            before: Some(before.clone()),
            after: Some(after.clone()),
        })
    }

    pub fn log_delete(
        &mut self,
        txn_id: u64,
        addr: &BlockAddress,
        slot: usize,
        before: &Record,
    ) -> DbResult<()> {
        self.append(&WalEntry {
            entry_type: WalEntryType::Delete,
            txn_id,
            address: Some(addr.clone()),
            slot,
            before: Some(before.clone()),
            after: None,
        })
    }

    /// Reads back every entry currently on disk, in append order.
    pub fn load(&self) -> DbResult<Vec<WalEntry>> {
        let file = File::open(&self.path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            entries.push(WalEntry::from_line(line)?);
        }
        Ok(entries)
    }

    /// Truncates the log after successful recovery or a clean commit cycle.
    pub fn clear(&mut self) -> DbResult<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(dir.path().join("wal.log")).unwrap();
        let addr = BlockAddress::new("users", 0);
        wal.log_begin(1).unwrap();
        wal.log_insert(1, &addr, 0, &Record::from_strs(&["1", "alice"]))
            .unwrap();
        wal.log_update(
            1,
            &addr,
            0,
            &Record::from_strs(&["1", "alice"]),
            &Record::from_strs(&["1", "alicia"]),
        )
        .unwrap();
        wal.log_delete(1, &addr, 0, &Record::from_strs(&["1", "alicia"]))
            .unwrap();
        wal.log_commit(1).unwrap();

        let entries = wal.load().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].entry_type, WalEntryType::Begin);
        assert_eq!(entries[1].after.as_ref().unwrap().values, vec!["1", "alice"]);
        assert_eq!(
            entries[2].before.as_ref().unwrap().values,
            vec!["1", "alice"]
        );
        assert_eq!(
            entries[2].after.as_ref().unwrap().values,
            vec!["1", "alicia"]
        );
        assert_eq!(entries[3].entry_type, WalEntryType::Delete);
        assert_eq!(entries[4].entry_type, WalEntryType::Commit);
    }

    #[test]
    fn values_with_delimiters_survive() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(dir.path().join("wal.log")).unwrap();
        let addr = BlockAddress::new("t", 3);
        let tricky = Record::from_strs(&["a|b", "c,d", ""]);
        wal.log_insert(9, &addr, 2, &tricky).unwrap();
        let entries = wal.load().unwrap();
        assert_eq!(entries[0].after.as_ref().unwrap(), &tricky);
        assert_eq!(entries[0].address.as_ref().unwrap(), &addr);
        assert_eq!(entries[0].slot, 2);
    }

    #[test]
    fn clear_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(dir.path().join("wal.log")).unwrap();
        wal.log_begin(1).unwrap();
        wal.clear().unwrap();
        assert!(wal.load().unwrap().is_empty());
        // The log remains appendable after truncation.
        wal.log_begin(2).unwrap();
        assert_eq!(wal.load().unwrap().len(), 1);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = WriteAheadLog::open(&path).unwrap();
            wal.log_begin(7).unwrap();
            wal.log_commit(7).unwrap();
        }
        let wal = WriteAheadLog::open(&path).unwrap();
        let entries = wal.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].txn_id, 7);
    }
}
