//! The database facade.
//!
//! Owns the buffer pool (and through it the disk), the WAL, the catalog, the
//! operational logs, every table and index, and the transaction state. All
//! mutation flows through here so index maintenance, undo collection and WAL
//! ordering stay consistent.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::common::errors::{DbError, DbResult};
use crate::common::{slice_index_key, BlockAddress, IndexPointer, Record};
use crate::config::{DbConfig, MemoryPartitions};
use crate::expr::Expr;
use crate::index::{BPlusTreeIndex, IndexDefinition};
use crate::io::{AccessPlanCache, LogBuffer, WalEntry, WalEntryType, WriteAheadLog};
use crate::schema::catalog::{
    load_index_catalog, load_schemas, persist_index_catalog, persist_schemas,
};
use crate::schema::{DataDictionary, Table, TableSchema};
use crate::sql::analyzer;
use crate::sql::ast::{DeleteStatement, InsertStatement, Statement, UpdateStatement};
use crate::sql::executor::{
    build_operator, run_to_result_set, ResultSet, Schema as ExecSchema, Tuple,
};
use crate::sql::parser::Parser;
use crate::sql::planner::{
    build_logical_plan, generate_physical_plan, optimize, PlannerContext,
};
use crate::storage::page::{Page, PAGE_HEADER_BYTES, SLOT_OVERHEAD_BYTES};
use crate::storage::{BufferPool, DiskStorage};

/// Distinguishes user-initiated mutations from replay (rollback and crash
/// recovery). Replay suppresses WAL writes, undo collection, and plan and
/// operation log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyMode {
    User,
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UndoKind {
    Insert,
    Delete,
    Update,
}

#[derive(Debug, Clone)]
struct UndoEntry {
    kind: UndoKind,
    address: BlockAddress,
    slot: usize,
    before: Option<Record>,
    after: Option<Record>,
}

/// Per-statement WAL scope: implicit single-statement transactions get a
/// synthesized begin/commit (or rollback on failure).
#[derive(Debug, Clone, Copy)]
struct WalContext {
    txn_id: u64,
    implicit: bool,
    active: bool,
}

impl WalContext {
    fn inactive() -> Self {
        Self {
            txn_id: 0,
            implicit: false,
            active: false,
        }
    }
}

/// Result of a table vacuum pass.
#[derive(Debug, Clone, Default)]
pub struct VacuumReport {
    pub table_name: String,
    pub blocks_visited: usize,
    pub blocks_modified: usize,
    pub slots_cleared: usize,
    pub bytes_reclaimed: usize,
    pub blocks_now_empty: usize,
}

#[derive(Debug, Clone)]
pub struct TableDumpRow {
    pub block_index: usize,
    pub slot: usize,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TableDump {
    pub rows: Vec<TableDumpRow>,
    pub total_records: usize,
    pub blocks_accessed: usize,
    pub records_skipped: usize,
    pub truncated: bool,
}

/// Outcome of `execute_sql`.
#[derive(Debug)]
pub enum QueryOutcome {
    Rows(ResultSet),
    Affected(usize),
}

pub struct Database {
    config: DbConfig,
    partitions: MemoryPartitions,
    buffer: BufferPool,
    dictionary: DataDictionary,
    plan_cache: AccessPlanCache,
    log_buffer: LogBuffer,
    wal: WriteAheadLog,
    tables: HashMap<String, Table>,
    indexes: HashMap<String, BPlusTreeIndex>,
    indexes_by_table: HashMap<String, Vec<String>>,
    index_definitions: HashMap<String, IndexDefinition>,
    pending_index_loads: HashMap<String, Vec<String>>,
    transaction_active: bool,
    current_txn: Option<u64>,
    next_txn_id: u64,
    undo_log: Vec<UndoEntry>,
    pending_wal: Vec<WalEntry>,
    wal_tables: HashSet<String>,
    recovery_performed: bool,
}

impl Database {
    pub fn open(config: DbConfig) -> DbResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.storage_root)?;

        let disk = DiskStorage::new(
            config.disk_blocks(),
            &config.storage_root,
            config.block_size,
        )?;
        let buffer = BufferPool::new(config.buffer_frames(), disk)?;
        let partitions = config.partitions();
        let dictionary = DataDictionary::new(partitions.dictionary);
        let plan_cache = AccessPlanCache::new(partitions.plan_cache, plan_cache_path(&config));
        let log_buffer = LogBuffer::new(partitions.log_buffer, operations_log_path(&config));
        let wal = WriteAheadLog::open(wal_path(&config))?;

        let mut db = Self {
            partitions,
            buffer,
            dictionary,
            plan_cache,
            log_buffer,
            wal,
            tables: HashMap::new(),
            indexes: HashMap::new(),
            indexes_by_table: HashMap::new(),
            index_definitions: HashMap::new(),
            pending_index_loads: HashMap::new(),
            transaction_active: false,
            current_txn: None,
            next_txn_id: 1,
            undo_log: Vec::new(),
            pending_wal: Vec::new(),
            wal_tables: HashSet::new(),
            recovery_performed: false,
            config,
        };

        for definition in load_index_catalog(db.index_catalog_path())? {
            db.pending_index_loads
                .entry(definition.table_name.clone())
                .or_default()
                .push(definition.name.clone());
            db.index_definitions
                .insert(definition.name.clone(), definition);
        }

        db.pending_wal = db.wal.load()?;
        let mut max_txn = 0;
        for entry in &db.pending_wal {
            if entry.entry_type.is_data() {
                if let Some(addr) = &entry.address {
                    db.wal_tables.insert(addr.table.clone());
                }
            }
            max_txn = max_txn.max(entry.txn_id);
        }
        if max_txn >= db.next_txn_id {
            db.next_txn_id = max_txn + 1;
        }
        db.recovery_performed = db.pending_wal.is_empty();

        Ok(db)
    }

    /// Re-registers every table recorded in `schemas.meta`. Used when
    /// reopening a storage root.
    pub fn bootstrap_schemas(&mut self) -> DbResult<Vec<String>> {
        let schemas = load_schemas(self.schemas_path())?;
        let mut names = Vec::new();
        for schema in schemas {
            if self.tables.contains_key(schema.name()) {
                continue;
            }
            names.push(schema.name().to_string());
            self.register_table(schema)?;
        }
        Ok(names)
    }

    // ---- paths ----

    fn meta_dir(&self) -> PathBuf {
        self.config.storage_root.join("meta")
    }

    fn index_dir(&self) -> PathBuf {
        self.config.storage_root.join("indexes")
    }

    fn index_data_path(&self, index_name: &str) -> PathBuf {
        self.index_dir().join(format!("{}.tree", index_name))
    }

    fn index_catalog_path(&self) -> PathBuf {
        self.meta_dir().join("indexes.meta")
    }

    fn schemas_path(&self) -> PathBuf {
        self.meta_dir().join("schemas.meta")
    }

    // ---- registration and lookup ----

    pub fn register_table(&mut self, schema: TableSchema) -> DbResult<()> {
        let minimal_payload =
            crate::storage::RECORD_HEADER_BYTES + schema.columns().len() * 4;
        let minimal_footprint =
            PAGE_HEADER_BYTES + SLOT_OVERHEAD_BYTES + minimal_payload;
        if self.config.block_size < minimal_footprint {
            return Err(DbError::InvalidArgument(format!(
                "block size {} bytes is insufficient for table {} (requires at least {} bytes)",
                self.config.block_size,
                schema.name(),
                minimal_footprint
            )));
        }
        if self.tables.contains_key(schema.name()) {
            return Err(DbError::InvalidArgument(format!(
                "table already registered: {}",
                schema.name()
            )));
        }

        let name = schema.name().to_string();
        self.dictionary.register_table(schema.clone());
        let mut table = Table::new(schema);
        for block in self.buffer.disk_mut().load_existing_blocks(&name)? {
            table.add_existing_block(block.address, block.record_count);
        }
        let records = table.total_records();
        let blocks = table.block_count();
        self.tables.insert(name.clone(), table);
        self.dictionary.update_table_stats(&name, records, blocks);

        self.restore_indexes_for_table(&name)?;
        self.recover_from_wal_if_needed()?;
        self.persist_schema_catalog()?;
        Ok(())
    }

    fn persist_schema_catalog(&self) -> DbResult<()> {
        let schemas: Vec<&TableSchema> = self.tables.values().map(Table::schema).collect();
        persist_schemas(self.schemas_path(), &schemas)
    }

    pub fn table(&self, name: &str) -> DbResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("unknown table: {}", name)))
    }

    fn table_mut(&mut self, name: &str) -> DbResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("unknown table: {}", name)))
    }

    pub fn dictionary(&self) -> &DataDictionary {
        &self.dictionary
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn disk_blocks(&self) -> usize {
        self.buffer.disk().total_blocks()
    }

    pub fn free_disk_blocks(&self) -> usize {
        self.buffer.disk().free_blocks()
    }

    pub fn buffer_hits(&self) -> u64 {
        self.buffer.hits()
    }

    pub fn buffer_misses(&self) -> u64 {
        self.buffer.misses()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_active
    }

    // ---- transactions ----

    pub fn begin_transaction(&mut self) -> DbResult<()> {
        if self.transaction_active {
            return Err(DbError::InvalidArgument(
                "transaction already in progress".into(),
            ));
        }
        let txn = self.next_txn_id;
        self.next_txn_id += 1;
        self.current_txn = Some(txn);
        self.transaction_active = true;
        self.undo_log.clear();
        self.wal.log_begin(txn)?;
        self.log_buffer.append("begin");
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> DbResult<()> {
        if !self.transaction_active {
            return Err(DbError::InvalidArgument(
                "no active transaction to commit".into(),
            ));
        }
        self.undo_log.clear();
        if let Some(txn) = self.current_txn {
            self.wal.log_commit(txn)?;
        }
        self.transaction_active = false;
        self.current_txn = None;
        self.log_buffer.append("commit");
        self.log_buffer.flush_to_disk()?;
        self.buffer.flush()?;
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> DbResult<()> {
        if !self.transaction_active {
            return Err(DbError::InvalidArgument(
                "no active transaction to rollback".into(),
            ));
        }
        if let Some(txn) = self.current_txn {
            self.wal.log_rollback(txn)?;
        }
        let undo: Vec<UndoEntry> = self.undo_log.drain(..).collect();
        self.transaction_active = false;
        self.current_txn = None;
        for entry in undo.iter().rev() {
            self.apply_undo(entry)?;
        }
        self.log_buffer.append("rollback");
        self.log_buffer.flush_to_disk()?;
        self.buffer.flush()?;
        Ok(())
    }

    fn start_wal_context(&mut self, mode: ApplyMode) -> DbResult<WalContext> {
        if mode == ApplyMode::Replay {
            return Ok(WalContext::inactive());
        }
        if self.transaction_active {
            let txn_id = match self.current_txn {
                Some(txn) => txn,
                None => {
                    let txn = self.next_txn_id;
                    self.next_txn_id += 1;
                    self.current_txn = Some(txn);
                    self.wal.log_begin(txn)?;
                    txn
                }
            };
            return Ok(WalContext {
                txn_id,
                implicit: false,
                active: true,
            });
        }
        let txn_id = self.next_txn_id;
        self.next_txn_id += 1;
        self.wal.log_begin(txn_id)?;
        Ok(WalContext {
            txn_id,
            implicit: true,
            active: true,
        })
    }

    fn finish_wal_context(&mut self, ctx: &WalContext, success: bool) -> DbResult<()> {
        if !ctx.active || !ctx.implicit {
            return Ok(());
        }
        if success {
            self.wal.log_commit(ctx.txn_id)
        } else {
            self.wal.log_rollback(ctx.txn_id)
        }
    }

    // ---- validation ----

    fn ensure_record_fits(schema: &TableSchema, record: &Record) -> DbResult<()> {
        if record.len() != schema.columns().len() {
            return Err(DbError::InvalidArgument(format!(
                "record has {} values, table {} has {} columns",
                record.len(),
                schema.name(),
                schema.columns().len()
            )));
        }
        for (value, column) in record.values.iter().zip(schema.columns()) {
            if value.len() > column.max_length {
                return Err(DbError::InvalidArgument(format!(
                    "value '{}' in column {} exceeds length {}",
                    value, column.name, column.max_length
                )));
            }
        }
        Ok(())
    }

    fn usable_page_bytes(&self) -> usize {
        self.config.block_size - PAGE_HEADER_BYTES
    }

    fn enforce_unique_keys(
        &self,
        table_name: &str,
        record: &Record,
        current: Option<(&BlockAddress, usize)>,
    ) -> DbResult<()> {
        let Some(index_names) = self.indexes_by_table.get(table_name) else {
            return Ok(());
        };
        for index_name in index_names {
            let Some(index) = self.indexes.get(index_name) else {
                continue;
            };
            if !index.definition().unique {
                continue;
            }
            let key = index.project_key(record);
            if key.is_empty() {
                continue;
            }
            let Some(existing) = index.find(&key) else {
                continue;
            };
            if let Some((addr, slot)) = current {
                if existing.address == *addr && existing.slot == slot {
                    continue;
                }
            }
            return Err(DbError::Conflict(format!(
                "duplicate key '{}' for index {}",
                key, index_name
            )));
        }
        Ok(())
    }

    // ---- mutation path ----

    pub fn insert_record(
        &mut self,
        table_name: &str,
        record: Record,
    ) -> DbResult<(BlockAddress, usize)> {
        self.insert_record_mode(table_name, record, ApplyMode::User)
    }

    fn insert_record_mode(
        &mut self,
        table_name: &str,
        record: Record,
        mode: ApplyMode,
    ) -> DbResult<(BlockAddress, usize)> {
        let ctx = self.start_wal_context(mode)?;
        match self.insert_record_inner(table_name, record, mode, &ctx) {
            Ok(placed) => {
                self.finish_wal_context(&ctx, true)?;
                Ok(placed)
            }
            Err(error) => {
                let _ = self.finish_wal_context(&ctx, false);
                Err(error)
            }
        }
    }

    fn insert_record_inner(
        &mut self,
        table_name: &str,
        record: Record,
        mode: ApplyMode,
        ctx: &WalContext,
    ) -> DbResult<(BlockAddress, usize)> {
        let schema = self.table(table_name)?.schema().clone();
        Self::ensure_record_fits(&schema, &record)?;
        self.enforce_unique_keys(table_name, &record, None)?;

        let footprint = Page::estimate_payload(&record) + SLOT_OVERHEAD_BYTES;
        if footprint > self.usable_page_bytes() {
            return Err(DbError::CapacityExceeded(format!(
                "record does not fit into a single block (requires {} bytes, usable page size is {})",
                footprint,
                self.usable_page_bytes()
            )));
        }

        if self.table(table_name)?.blocks().is_empty() {
            let addr = self.buffer.disk_mut().allocate_block(table_name)?;
            self.table_mut(table_name)?.add_block(addr);
        }
        let mut target = self
            .table(table_name)?
            .last_block()
            .expect("block just ensured")
            .clone();

        let fits = {
            let fetched = self.buffer.fetch(&target, true)?;
            fetched.page.has_space_for(&record)
        };
        if !fits {
            let addr = self.buffer.disk_mut().allocate_block(table_name)?;
            self.table_mut(table_name)?.add_block(addr.clone());
            target = addr;
            let fetched = self.buffer.fetch(&target, true)?;
            if !fetched.page.has_space_for(&record) {
                return Err(DbError::CapacityExceeded(format!(
                    "record cannot be placed even in an empty block for {}",
                    table_name
                )));
            }
        }

        let slot = {
            let fetched = self.buffer.fetch(&target, true)?;
            fetched.page.insert(&record).ok_or_else(|| {
                DbError::CapacityExceeded(format!(
                    "failed to insert record into block {}",
                    target
                ))
            })?
        };

        if let Err(error) = self.apply_index_insert(table_name, &record, &target, slot) {
            let fetched = self.buffer.fetch(&target, true)?;
            fetched.page.erase(slot);
            return Err(error);
        }

        if self.transaction_active && mode == ApplyMode::User {
            self.undo_log.push(UndoEntry {
                kind: UndoKind::Insert,
                address: target.clone(),
                slot,
                before: None,
                after: Some(record.clone()),
            });
        }
        if ctx.active && mode == ApplyMode::User {
            self.wal.log_insert(ctx.txn_id, &target, slot, &record)?;
        }
        self.persist_indexes_for_table(table_name)?;

        self.table_mut(table_name)?.increment_records();
        let (records, blocks) = {
            let table = self.table(table_name)?;
            (table.total_records(), table.block_count())
        };
        self.dictionary
            .update_table_stats(table_name, records, blocks);
        if mode == ApplyMode::User {
            self.plan_cache
                .record_plan(format!("INSERT INTO {}", table_name));
            self.log_buffer.append(format!("insert into {}", table_name));
        }
        Ok((target, slot))
    }

    pub fn read_record(
        &mut self,
        addr: &BlockAddress,
        slot: usize,
    ) -> DbResult<Option<Record>> {
        self.table(&addr.table)?;
        let fetched = self.buffer.fetch(addr, false)?;
        Ok(fetched.page.get(slot))
    }

    /// Active records of one block, in slot order.
    pub fn read_block_records(
        &mut self,
        addr: &BlockAddress,
    ) -> DbResult<Vec<(usize, Record)>> {
        self.table(&addr.table)?;
        let fetched = self.buffer.fetch(addr, false)?;
        let mut records = Vec::new();
        fetched.page.for_each_record(|slot, record| {
            records.push((slot, record));
        });
        Ok(records)
    }

    pub fn update_record(
        &mut self,
        addr: &BlockAddress,
        slot: usize,
        record: Record,
    ) -> DbResult<bool> {
        self.update_record_mode(addr, slot, record, ApplyMode::User)
    }

    fn update_record_mode(
        &mut self,
        addr: &BlockAddress,
        slot: usize,
        record: Record,
        mode: ApplyMode,
    ) -> DbResult<bool> {
        let ctx = self.start_wal_context(mode)?;
        match self.update_record_inner(addr, slot, record, mode, &ctx) {
            Ok(success) => {
                self.finish_wal_context(&ctx, success)?;
                Ok(success)
            }
            Err(error) => {
                let _ = self.finish_wal_context(&ctx, false);
                Err(error)
            }
        }
    }

    fn update_record_inner(
        &mut self,
        addr: &BlockAddress,
        slot: usize,
        record: Record,
        mode: ApplyMode,
        ctx: &WalContext,
    ) -> DbResult<bool> {
        let schema = self.table(&addr.table)?.schema().clone();
        Self::ensure_record_fits(&schema, &record)?;
        self.enforce_unique_keys(&addr.table, &record, Some((addr, slot)))?;

        let footprint = Page::estimate_payload(&record) + SLOT_OVERHEAD_BYTES;
        if footprint > self.usable_page_bytes() {
            return Err(DbError::CapacityExceeded(format!(
                "updated record exceeds block capacity (requires {} bytes, usable page size {})",
                footprint,
                self.usable_page_bytes()
            )));
        }

        let before = {
            let fetched = self.buffer.fetch(addr, true)?;
            let Some(before) = fetched.page.get(slot) else {
                return Ok(false);
            };
            if !fetched.page.update(slot, &record)? {
                return Ok(false);
            }
            before
        };

        self.apply_index_update(&addr.table, &before, &record, addr, slot)?;

        if self.transaction_active && mode == ApplyMode::User {
            self.undo_log.push(UndoEntry {
                kind: UndoKind::Update,
                address: addr.clone(),
                slot,
                before: Some(before.clone()),
                after: None,
            });
        }
        if ctx.active && mode == ApplyMode::User {
            self.wal
                .log_update(ctx.txn_id, addr, slot, &before, &record)?;
        }
        self.persist_indexes_for_table(&addr.table)?;

        if mode == ApplyMode::User {
            self.plan_cache.record_plan(format!("UPDATE {}", addr.table));
            self.log_buffer.append(format!("update {}", addr.table));
        }
        Ok(true)
    }

    pub fn delete_record(&mut self, addr: &BlockAddress, slot: usize) -> DbResult<bool> {
        self.delete_record_mode(addr, slot, ApplyMode::User)
    }

    fn delete_record_mode(
        &mut self,
        addr: &BlockAddress,
        slot: usize,
        mode: ApplyMode,
    ) -> DbResult<bool> {
        let ctx = self.start_wal_context(mode)?;
        match self.delete_record_inner(addr, slot, mode, &ctx) {
            Ok(success) => {
                self.finish_wal_context(&ctx, success)?;
                Ok(success)
            }
            Err(error) => {
                let _ = self.finish_wal_context(&ctx, false);
                Err(error)
            }
        }
    }

    fn delete_record_inner(
        &mut self,
        addr: &BlockAddress,
        slot: usize,
        mode: ApplyMode,
        ctx: &WalContext,
    ) -> DbResult<bool> {
        self.table(&addr.table)?;
        let before = {
            let fetched = self.buffer.fetch(addr, true)?;
            let before = fetched.page.get(slot);
            if !fetched.page.erase(slot) {
                return Ok(false);
            }
            before
        };

        if let Some(before) = &before {
            self.apply_index_delete(&addr.table, before)?;
            if self.transaction_active && mode == ApplyMode::User {
                self.undo_log.push(UndoEntry {
                    kind: UndoKind::Delete,
                    address: addr.clone(),
                    slot,
                    before: Some(before.clone()),
                    after: None,
                });
            }
            if ctx.active && mode == ApplyMode::User {
                self.wal.log_delete(ctx.txn_id, addr, slot, before)?;
            }
        }

        self.table_mut(&addr.table)?.decrement_records()?;
        let (records, blocks) = {
            let table = self.table(&addr.table)?;
            (table.total_records(), table.block_count())
        };
        self.dictionary
            .update_table_stats(&addr.table, records, blocks);
        if mode == ApplyMode::User {
            self.plan_cache
                .record_plan(format!("DELETE FROM {}", addr.table));
            self.log_buffer.append(format!("delete from {}", addr.table));
        }
        self.persist_indexes_for_table(&addr.table)?;
        Ok(true)
    }

    // ---- undo and recovery ----

    fn apply_undo(&mut self, entry: &UndoEntry) -> DbResult<()> {
        match entry.kind {
            UndoKind::Insert => {
                let removed =
                    self.delete_record_mode(&entry.address, entry.slot, ApplyMode::Replay)?;
                if !removed {
                    if let Some(after) = &entry.after {
                        self.remove_matching_record(&entry.address.table.clone(), after)?;
                    }
                }
            }
            UndoKind::Delete => {
                if let Some(before) = &entry.before {
                    let restored =
                        self.restore_deleted_record(&entry.address, entry.slot, before)?;
                    if !restored {
                        self.insert_record_mode(
                            &entry.address.table.clone(),
                            before.clone(),
                            ApplyMode::Replay,
                        )?;
                    }
                }
            }
            UndoKind::Update => {
                if let Some(before) = &entry.before {
                    self.update_record_mode(
                        &entry.address,
                        entry.slot,
                        before.clone(),
                        ApplyMode::Replay,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn restore_deleted_record(
        &mut self,
        addr: &BlockAddress,
        slot: usize,
        record: &Record,
    ) -> DbResult<bool> {
        self.table(&addr.table)?;
        let restored = {
            let fetched = self.buffer.fetch(addr, true)?;
            fetched.page.restore(slot)
        };
        if !restored {
            return Ok(false);
        }
        self.apply_index_insert(&addr.table, record, addr, slot)?;
        self.table_mut(&addr.table)?.increment_records();
        let (records, blocks) = {
            let table = self.table(&addr.table)?;
            (table.total_records(), table.block_count())
        };
        self.dictionary
            .update_table_stats(&addr.table, records, blocks);
        self.persist_indexes_for_table(&addr.table)?;
        Ok(true)
    }

    /// Locates a row by content equality; tolerates slot drift after crashes.
    pub fn find_record(
        &mut self,
        table_name: &str,
        record: &Record,
    ) -> DbResult<Option<(BlockAddress, usize)>> {
        let blocks: Vec<BlockAddress> = self.table(table_name)?.blocks().to_vec();
        for addr in blocks {
            let fetched = self.buffer.fetch(&addr, false)?;
            let mut found = None;
            fetched.page.for_each_record(|slot, candidate| {
                if found.is_none() && candidate.values == record.values {
                    found = Some(slot);
                }
            });
            if let Some(slot) = found {
                return Ok(Some((addr, slot)));
            }
        }
        Ok(None)
    }

    fn remove_matching_record(&mut self, table_name: &str, target: &Record) -> DbResult<bool> {
        match self.find_record(table_name, target)? {
            Some((addr, slot)) => self.delete_record_mode(&addr, slot, ApplyMode::Replay),
            None => Ok(false),
        }
    }

    fn all_wal_tables_registered(&self) -> bool {
        self.wal_tables
            .iter()
            .all(|name| self.tables.contains_key(name))
    }

    fn recover_from_wal_if_needed(&mut self) -> DbResult<()> {
        if self.recovery_performed {
            return Ok(());
        }
        if self.pending_wal.is_empty() {
            self.wal.clear()?;
            self.recovery_performed = true;
            return Ok(());
        }
        if !self.all_wal_tables_registered() {
            return Ok(());
        }
        self.perform_crash_recovery()
    }

    /// Two-pass analysis: REDO data entries of committed transactions in log
    /// order, then UNDO uncommitted ones in reverse.
    fn perform_crash_recovery(&mut self) -> DbResult<()> {
        let mut committed: HashMap<u64, bool> = HashMap::new();
        for entry in &self.pending_wal {
            match entry.entry_type {
                WalEntryType::Begin => {
                    committed.entry(entry.txn_id).or_insert(false);
                }
                WalEntryType::Commit => {
                    committed.insert(entry.txn_id, true);
                }
                WalEntryType::Rollback => {
                    committed.insert(entry.txn_id, false);
                }
                _ => {}
            }
        }

        let entries: Vec<WalEntry> = self.pending_wal.clone();
        for entry in &entries {
            if entry.entry_type.is_data() && committed.get(&entry.txn_id).copied().unwrap_or(false)
            {
                if let Err(error) = self.apply_wal_redo(entry) {
                    warn!(error = %error, "WAL redo skipped entry");
                }
            }
        }
        for entry in entries.iter().rev() {
            if entry.entry_type.is_data()
                && !committed.get(&entry.txn_id).copied().unwrap_or(false)
            {
                self.apply_wal_undo(entry)?;
            }
        }

        self.buffer.flush()?;
        let index_names: Vec<String> = self.indexes.keys().cloned().collect();
        for name in index_names {
            self.persist_index(&name)?;
        }
        self.wal.clear()?;
        self.pending_wal.clear();
        self.wal_tables.clear();
        self.recovery_performed = true;
        debug!("crash recovery complete");
        Ok(())
    }

    fn apply_wal_redo(&mut self, entry: &WalEntry) -> DbResult<()> {
        let Some(addr) = &entry.address else {
            return Ok(());
        };
        match entry.entry_type {
            WalEntryType::Insert => {
                let Some(after) = &entry.after else {
                    return Ok(());
                };
                if self.find_record(&addr.table, after)?.is_some() {
                    return Ok(());
                }
                self.insert_record_mode(&addr.table.clone(), after.clone(), ApplyMode::Replay)?;
            }
            WalEntryType::Delete => {
                let Some(before) = &entry.before else {
                    return Ok(());
                };
                if let Some((found_addr, found_slot)) = self.find_record(&addr.table, before)? {
                    self.delete_record_mode(&found_addr, found_slot, ApplyMode::Replay)?;
                }
            }
            WalEntryType::Update => {
                let Some(after) = &entry.after else {
                    return Ok(());
                };
                let mut located = None;
                if let Some(before) = &entry.before {
                    located = self.find_record(&addr.table, before)?;
                }
                if located.is_none() && self.buffer.disk().contains(addr) {
                    let present = {
                        let fetched = self.buffer.fetch(addr, false)?;
                        fetched.page.get(entry.slot).is_some()
                    };
                    if present {
                        located = Some((addr.clone(), entry.slot));
                    }
                }
                match located {
                    Some((found_addr, found_slot)) => {
                        let updated = self.update_record_mode(
                            &found_addr,
                            found_slot,
                            after.clone(),
                            ApplyMode::Replay,
                        )?;
                        if !updated {
                            self.insert_record_mode(
                                &addr.table.clone(),
                                after.clone(),
                                ApplyMode::Replay,
                            )?;
                        }
                    }
                    None => {
                        self.insert_record_mode(
                            &addr.table.clone(),
                            after.clone(),
                            ApplyMode::Replay,
                        )?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_wal_undo(&mut self, entry: &WalEntry) -> DbResult<()> {
        let Some(addr) = &entry.address else {
            return Ok(());
        };
        let kind = match entry.entry_type {
            WalEntryType::Insert => UndoKind::Insert,
            WalEntryType::Delete => UndoKind::Delete,
            WalEntryType::Update => UndoKind::Update,
            _ => return Ok(()),
        };
        let undo = UndoEntry {
            kind,
            address: addr.clone(),
            slot: entry.slot,
            before: entry.before.clone(),
            after: entry.after.clone(),
        };
        self.apply_undo(&undo)
    }

    // ---- indexes ----

    pub fn create_index(
        &mut self,
        index_name: &str,
        table_name: &str,
        column_name: &str,
    ) -> DbResult<Vec<String>> {
        self.create_index_with_uniqueness(index_name, table_name, column_name, false)
    }

    pub fn create_unique_index(
        &mut self,
        index_name: &str,
        table_name: &str,
        column_name: &str,
    ) -> DbResult<Vec<String>> {
        self.create_index_with_uniqueness(index_name, table_name, column_name, true)
    }

    fn create_index_with_uniqueness(
        &mut self,
        index_name: &str,
        table_name: &str,
        column_name: &str,
        unique: bool,
    ) -> DbResult<Vec<String>> {
        if self.indexes.contains_key(index_name) {
            return Err(DbError::Conflict(format!(
                "index already exists: {}",
                index_name
            )));
        }
        let schema = self.table(table_name)?.schema().clone();
        let column_index = schema.column_index(column_name).ok_or_else(|| {
            DbError::NotFound(format!(
                "unknown column '{}' on table {}",
                column_name, table_name
            ))
        })?;
        let definition = IndexDefinition {
            name: index_name.to_string(),
            table_name: table_name.to_string(),
            column_name: column_name.to_string(),
            column_index,
            key_length: schema.columns()[column_index].max_length,
            unique,
        };

        let mut entries =
            self.collect_index_entries(table_name, column_index, definition.key_length)?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);

        let mut index = BPlusTreeIndex::new(definition.clone(), self.config.block_size);
        index.rebuild(&entries)?;
        let pages = index.describe_pages();

        self.dictionary
            .register_index(definition.clone(), index.entries_per_page());
        self.indexes.insert(index_name.to_string(), index);
        let per_table = self
            .indexes_by_table
            .entry(table_name.to_string())
            .or_default();
        if !per_table.iter().any(|n| n == index_name) {
            per_table.push(index_name.to_string());
        }
        self.index_definitions
            .insert(index_name.to_string(), definition);
        self.remove_pending_index(table_name, index_name);
        self.persist_index_catalog_file()?;
        self.persist_index(index_name)?;
        self.plan_cache
            .record_plan(format!("CREATE INDEX {} ON {}", index_name, table_name));
        self.log_buffer
            .append(format!("create index {} on {}", index_name, table_name));
        Ok(pages)
    }

    fn collect_index_entries(
        &mut self,
        table_name: &str,
        column_index: usize,
        key_length: usize,
    ) -> DbResult<Vec<(String, IndexPointer)>> {
        let blocks: Vec<BlockAddress> = self.table(table_name)?.blocks().to_vec();
        let mut entries = Vec::new();
        for addr in blocks {
            let fetched = self.buffer.fetch(&addr, false)?;
            fetched.page.for_each_record(|slot, record| {
                let key = slice_index_key(&record, column_index, key_length);
                if !key.is_empty() {
                    entries.push((
                        key,
                        IndexPointer {
                            address: addr.clone(),
                            slot,
                        },
                    ));
                }
            });
        }
        Ok(entries)
    }

    fn apply_index_insert(
        &mut self,
        table_name: &str,
        record: &Record,
        addr: &BlockAddress,
        slot: usize,
    ) -> DbResult<()> {
        let Some(index_names) = self.indexes_by_table.get(table_name).cloned() else {
            return Ok(());
        };
        for index_name in index_names {
            if let Some(index) = self.indexes.get_mut(&index_name) {
                index.insert_record(record, addr, slot)?;
            }
        }
        Ok(())
    }

    fn apply_index_update(
        &mut self,
        table_name: &str,
        before: &Record,
        after: &Record,
        addr: &BlockAddress,
        slot: usize,
    ) -> DbResult<()> {
        let Some(index_names) = self.indexes_by_table.get(table_name).cloned() else {
            return Ok(());
        };
        for index_name in index_names {
            if let Some(index) = self.indexes.get_mut(&index_name) {
                index.update_record(before, after, addr, slot)?;
            }
        }
        Ok(())
    }

    fn apply_index_delete(&mut self, table_name: &str, record: &Record) -> DbResult<()> {
        let Some(index_names) = self.indexes_by_table.get(table_name).cloned() else {
            return Ok(());
        };
        for index_name in index_names {
            if let Some(index) = self.indexes.get_mut(&index_name) {
                index.delete_record(record);
            }
        }
        Ok(())
    }

    fn persist_indexes_for_table(&mut self, table_name: &str) -> DbResult<()> {
        let Some(index_names) = self.indexes_by_table.get(table_name).cloned() else {
            return Ok(());
        };
        for index_name in index_names {
            self.persist_index(&index_name)?;
        }
        Ok(())
    }

    fn persist_index(&self, index_name: &str) -> DbResult<()> {
        if let Some(index) = self.indexes.get(index_name) {
            index.save_to_file(self.index_data_path(index_name))?;
        }
        Ok(())
    }

    fn persist_index_catalog_file(&self) -> DbResult<()> {
        let mut definitions: Vec<IndexDefinition> =
            self.index_definitions.values().cloned().collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        persist_index_catalog(self.index_catalog_path(), &definitions)
    }

    fn remove_pending_index(&mut self, table_name: &str, index_name: &str) {
        if let Some(pending) = self.pending_index_loads.get_mut(table_name) {
            pending.retain(|name| name != index_name);
            if pending.is_empty() {
                self.pending_index_loads.remove(table_name);
            }
        }
    }

    fn load_index_from_disk(&mut self, definition: IndexDefinition) -> DbResult<()> {
        let mut index = BPlusTreeIndex::new(definition.clone(), self.config.block_size);
        let path = self.index_data_path(&definition.name);
        let mut loaded = false;
        if path.is_file() {
            match index.load_from_file(&path) {
                Ok(()) => loaded = true,
                Err(error) => {
                    warn!(
                        index = %definition.name,
                        error = %error,
                        "unable to load index file; rebuilding"
                    );
                }
            }
        }
        if !loaded {
            let entries = self.collect_index_entries(
                &definition.table_name,
                definition.column_index,
                definition.key_length,
            )?;
            let mut sorted = entries;
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            index.rebuild(&sorted)?;
            index.save_to_file(&path)?;
        }
        let per_table = self
            .indexes_by_table
            .entry(definition.table_name.clone())
            .or_default();
        if !per_table.iter().any(|n| n == &definition.name) {
            per_table.push(definition.name.clone());
        }
        self.dictionary
            .register_index(definition.clone(), index.entries_per_page());
        self.indexes.insert(definition.name.clone(), index);
        Ok(())
    }

    fn restore_indexes_for_table(&mut self, table_name: &str) -> DbResult<()> {
        let Some(pending) = self.pending_index_loads.remove(table_name) else {
            return Ok(());
        };
        for index_name in pending {
            if self.indexes.contains_key(&index_name) {
                continue;
            }
            let Some(definition) = self.index_definitions.get(&index_name).cloned() else {
                continue;
            };
            self.load_index_from_disk(definition)?;
        }
        Ok(())
    }

    pub fn find_index_for_column(&self, table_name: &str, column_name: &str) -> Option<String> {
        let index_names = self.indexes_by_table.get(table_name)?;
        for index_name in index_names {
            if let Some(definition) = self.index_definitions.get(index_name) {
                if definition.column_name == column_name {
                    return Some(index_name.clone());
                }
            }
        }
        None
    }

    pub fn search_index(&self, index_name: &str, key: &str) -> DbResult<Option<IndexPointer>> {
        let index = self
            .indexes
            .get(index_name)
            .ok_or_else(|| DbError::NotFound(format!("unknown index: {}", index_name)))?;
        Ok(index.find(key))
    }

    pub fn describe_index_file(&self, index_name: &str) -> DbResult<Vec<String>> {
        let index = self
            .indexes
            .get(index_name)
            .ok_or_else(|| DbError::NotFound(format!("unknown index: {}", index_name)))?;
        Ok(index.describe_pages())
    }

    pub fn index_summaries(&self) -> Vec<String> {
        let mut names: Vec<&String> = self.indexes.keys().collect();
        names.sort();
        names
            .iter()
            .filter_map(|name| self.indexes.get(*name))
            .map(|index| {
                let def = index.definition();
                format!(
                    "{} ON {}({}) | entries/page={}",
                    def.name,
                    def.table_name,
                    def.column_name,
                    index.entries_per_page()
                )
            })
            .collect()
    }

    // ---- maintenance and introspection ----

    pub fn vacuum_table(&mut self, table_name: &str) -> DbResult<VacuumReport> {
        let blocks: Vec<BlockAddress> = self.table(table_name)?.blocks().to_vec();
        let mut report = VacuumReport {
            table_name: table_name.to_string(),
            ..VacuumReport::default()
        };
        for addr in blocks {
            report.blocks_visited += 1;
            let (stats, now_empty) = {
                let fetched = self.buffer.fetch(&addr, true)?;
                let garbage_only =
                    fetched.page.active_count() == 0 && fetched.page.deleted_count() > 0;
                let stats = fetched.page.vacuum();
                (stats, garbage_only && fetched.page.active_count() == 0)
            };
            if stats.cleared_slots > 0 {
                report.blocks_modified += 1;
                report.slots_cleared += stats.cleared_slots;
                report.bytes_reclaimed += stats.reclaimed_bytes;
                if now_empty {
                    report.blocks_now_empty += 1;
                }
            }
        }
        if report.blocks_modified > 0 {
            let (records, blocks) = {
                let table = self.table(table_name)?;
                (table.total_records(), table.block_count())
            };
            self.dictionary
                .update_table_stats(table_name, records, blocks);
            self.plan_cache
                .record_plan(format!("VACUUM {}", table_name));
            self.log_buffer.append(format!("vacuum {}", table_name));
        }
        Ok(report)
    }

    pub fn vacuum_all_tables(&mut self) -> DbResult<Vec<VacuumReport>> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| self.vacuum_table(&name))
            .collect()
    }

    pub fn dump_table(
        &mut self,
        table_name: &str,
        limit: usize,
        offset: usize,
    ) -> DbResult<TableDump> {
        let blocks: Vec<BlockAddress> = self.table(table_name)?.blocks().to_vec();
        let mut dump = TableDump {
            total_records: self.table(table_name)?.total_records(),
            ..TableDump::default()
        };
        self.plan_cache.record_plan(format!("SCAN {}", table_name));
        self.log_buffer.append(format!("scan {}", table_name));

        let mut skipped = 0;
        'blocks: for addr in blocks {
            let rows = {
                let fetched = self.buffer.fetch(&addr, false)?;
                let mut rows = Vec::new();
                fetched.page.for_each_record(|slot, record| {
                    rows.push((slot, record));
                });
                rows
            };
            dump.blocks_accessed += 1;
            for (slot, record) in rows {
                if offset > 0 && skipped < offset {
                    skipped += 1;
                    continue;
                }
                if limit != 0 && dump.rows.len() >= limit {
                    break 'blocks;
                }
                dump.rows.push(TableDumpRow {
                    block_index: addr.index,
                    slot,
                    values: record.values,
                });
            }
        }
        dump.records_skipped = skipped;
        if limit != 0 && (offset + dump.rows.len()) < dump.total_records {
            dump.truncated = true;
        }
        Ok(dump)
    }

    pub fn flush_all(&mut self) -> DbResult<()> {
        self.buffer.flush()?;
        self.log_buffer.flush_to_disk()?;
        Ok(())
    }

    pub fn memory_layout_description(&self) -> String {
        let mut out = String::from("Memory layout (bytes):\n");
        out.push_str(&format!("  - Access plans: {}\n", self.partitions.plan_cache));
        out.push_str(&format!(
            "  - Data dictionary: {}\n",
            self.partitions.dictionary
        ));
        out.push_str(&format!(
            "  - Data buffer: {} ({} frame(s))\n",
            self.partitions.data_buffer,
            self.buffer.capacity()
        ));
        out.push_str(&format!("  - Log buffer: {}\n", self.partitions.log_buffer));
        out.push_str(&self.dictionary.describe());
        out.push_str(&self.plan_cache.describe());
        out.push('\n');
        out.push_str(&self.log_buffer.describe());
        out.push('\n');
        out
    }

    pub fn table_summaries(&self) -> Vec<String> {
        let mut names: Vec<&String> = self.tables.keys().collect();
        names.sort();
        names
            .iter()
            .filter_map(|name| self.tables.get(*name))
            .map(|table| {
                format!(
                    "{}  Records: {} spanning {} blocks\n",
                    table.schema().describe(),
                    table.total_records(),
                    table.block_count()
                )
            })
            .collect()
    }

    pub fn system_catalog_rows(&self) -> Vec<String> {
        let mut rows = self.dictionary.describe_tables();
        rows.extend(self.dictionary.describe_index_catalog());
        rows
    }

    pub fn cached_access_plans(&self, limit: usize) -> Vec<String> {
        self.plan_cache.recent_plans(limit)
    }

    pub fn persisted_access_plans(&self, limit: usize) -> Vec<String> {
        self.plan_cache.persisted_plans(limit)
    }

    pub fn buffered_logs(&self) -> Vec<String> {
        self.log_buffer.buffered_entries()
    }

    pub fn persisted_logs(&self, limit: usize) -> Vec<String> {
        self.log_buffer.persisted_entries(limit)
    }

    // ---- statement execution (mutations) ----

    fn exec_schema_for(&self, table_name: &str) -> DbResult<Rc<ExecSchema>> {
        let schema = self.table(table_name)?.schema();
        let mut exec = ExecSchema::new();
        for (i, column) in schema.columns().iter().enumerate() {
            exec.add_column_info(column.name.as_str(), column.column_type, i, table_name);
        }
        Ok(Rc::new(exec))
    }

    fn constant_value(expr: &Expr) -> DbResult<String> {
        let empty = Tuple::new(Vec::new(), Rc::new(ExecSchema::new()));
        Ok(expr.evaluate(&empty)?.as_display().to_string())
    }

    pub(crate) fn execute_insert(&mut self, statement: &InsertStatement) -> DbResult<usize> {
        let mut values = Vec::with_capacity(statement.values.len());
        for expr in &statement.values {
            values.push(Self::constant_value(expr)?);
        }
        self.insert_record(&statement.table, Record::new(values))?;
        Ok(1)
    }

    fn matching_rows(
        &mut self,
        table_name: &str,
        predicate: Option<&Expr>,
    ) -> DbResult<Vec<(BlockAddress, usize, Record)>> {
        let exec_schema = self.exec_schema_for(table_name)?;
        let blocks: Vec<BlockAddress> = self.table(table_name)?.blocks().to_vec();
        let mut matches = Vec::new();
        for addr in blocks {
            let rows = self.read_block_records(&addr)?;
            for (slot, record) in rows {
                if let Some(predicate) = predicate {
                    let tuple =
                        Tuple::new(record.values.clone(), Rc::clone(&exec_schema));
                    if !predicate.evaluate_bool(&tuple)? {
                        continue;
                    }
                }
                matches.push((addr.clone(), slot, record));
            }
        }
        Ok(matches)
    }

    pub(crate) fn execute_update(&mut self, statement: &UpdateStatement) -> DbResult<usize> {
        let schema = self.table(&statement.table)?.schema().clone();
        let exec_schema = self.exec_schema_for(&statement.table)?;
        let mut resolved = Vec::with_capacity(statement.assignments.len());
        for (column, expr) in &statement.assignments {
            let bare = column.rsplit('.').next().unwrap_or(column);
            let index = schema.column_index(bare).ok_or_else(|| {
                DbError::NotFound(format!(
                    "unknown column '{}' on table {}",
                    column, statement.table
                ))
            })?;
            resolved.push((index, expr));
        }

        let matches = self.matching_rows(&statement.table, statement.where_clause.as_ref())?;
        let mut affected = 0;
        for (addr, slot, record) in matches {
            let tuple = Tuple::new(record.values.clone(), Rc::clone(&exec_schema));
            let mut updated = record.clone();
            for (index, expr) in &resolved {
                updated.values[*index] = expr.evaluate(&tuple)?.as_display().to_string();
            }
            if self.update_record(&addr, slot, updated)? {
                affected += 1;
            }
        }
        Ok(affected)
    }

    pub(crate) fn execute_delete(&mut self, statement: &DeleteStatement) -> DbResult<usize> {
        let matches = self.matching_rows(&statement.table, statement.where_clause.as_ref())?;
        let mut affected = 0;
        for (addr, slot, _) in matches {
            if self.delete_record(&addr, slot)? {
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn record_select_plan(&mut self, sql: &str, cost: i64) {
        self.plan_cache
            .record_plan(format!("{} [cost={}]", sql.trim(), cost));
        self.log_buffer.append(format!("select cost={}", cost));
    }
}

impl PlannerContext for Database {
    fn table_block_count(&self, table: &str) -> Option<usize> {
        self.tables.get(table).map(Table::block_count)
    }

    fn find_index_for_column(&self, table: &str, column: &str) -> Option<String> {
        Database::find_index_for_column(self, table, column)
    }
}

/// Cloneable handle to the engine. Operators hold one for the duration of
/// their pipeline; each call takes the lock briefly.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<RwLock<Database>>,
}

impl SharedDatabase {
    pub fn open(config: DbConfig) -> DbResult<Self> {
        Ok(Self::from_database(Database::open(config)?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            inner: Arc::new(RwLock::new(db)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Database> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Database> {
        self.inner.write()
    }

    /// Full statement execution: SELECT through the operator pipeline,
    /// mutations through the facade.
    pub fn execute_sql(&self, sql: &str) -> DbResult<QueryOutcome> {
        let statement = Parser::parse(sql)?;
        {
            let guard = self.read();
            analyzer::analyze(&statement, guard.dictionary())?;
        }
        match &statement {
            Statement::Select(select) => {
                let logical = build_logical_plan(select)?;
                let optimized = optimize(logical);
                let physical = {
                    let guard = self.read();
                    generate_physical_plan(&optimized, &*guard)
                };
                self.write()
                    .record_select_plan(sql, physical.estimated_cost);
                let mut root = build_operator(&physical, self)?;
                let results = run_to_result_set(root.as_mut())?;
                Ok(QueryOutcome::Rows(results))
            }
            Statement::Insert(insert) => {
                Ok(QueryOutcome::Affected(self.write().execute_insert(insert)?))
            }
            Statement::Update(update) => {
                Ok(QueryOutcome::Affected(self.write().execute_update(update)?))
            }
            Statement::Delete(delete) => {
                Ok(QueryOutcome::Affected(self.write().execute_delete(delete)?))
            }
        }
    }

    /// Convenience wrapper returning rows; errors on mutations.
    pub fn query(&self, sql: &str) -> DbResult<ResultSet> {
        match self.execute_sql(sql)? {
            QueryOutcome::Rows(rows) => Ok(rows),
            QueryOutcome::Affected(_) => Err(DbError::InvalidArgument(
                "statement did not produce rows".into(),
            )),
        }
    }

    pub fn register_table(&self, schema: TableSchema) -> DbResult<()> {
        self.write().register_table(schema)
    }

    pub fn insert_record(
        &self,
        table: &str,
        record: Record,
    ) -> DbResult<(BlockAddress, usize)> {
        self.write().insert_record(table, record)
    }

    pub fn begin_transaction(&self) -> DbResult<()> {
        self.write().begin_transaction()
    }

    pub fn commit_transaction(&self) -> DbResult<()> {
        self.write().commit_transaction()
    }

    pub fn rollback_transaction(&self) -> DbResult<()> {
        self.write().rollback_transaction()
    }

    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        column_name: &str,
    ) -> DbResult<Vec<String>> {
        self.write().create_index(index_name, table_name, column_name)
    }

    pub fn create_unique_index(
        &self,
        index_name: &str,
        table_name: &str,
        column_name: &str,
    ) -> DbResult<Vec<String>> {
        self.write()
            .create_unique_index(index_name, table_name, column_name)
    }

    pub fn search_index(&self, index_name: &str, key: &str) -> DbResult<Option<IndexPointer>> {
        self.read().search_index(index_name, key)
    }

    pub fn dump_table(&self, table: &str, limit: usize, offset: usize) -> DbResult<TableDump> {
        self.write().dump_table(table, limit, offset)
    }

    pub fn flush_all(&self) -> DbResult<()> {
        self.write().flush_all()
    }
}

fn plan_cache_path(config: &DbConfig) -> PathBuf {
    config.storage_root.join("meta").join("access_plans.log")
}

fn operations_log_path(config: &DbConfig) -> PathBuf {
    config.storage_root.join("logs").join("operations.log")
}

fn wal_path(config: &DbConfig) -> PathBuf {
    config.storage_root.join("logs").join("wal.log")
}
