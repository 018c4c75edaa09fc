//! Table schemas and per-table block bookkeeping.

pub mod catalog;

use crate::common::errors::{DbError, DbResult};
use crate::common::{BlockAddress, ColumnDefinition};

pub use catalog::DataDictionary;

/// A stored table's definition: a non-empty ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDefinition>,
    record_size: usize,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::InvalidArgument(
                "schema must contain at least one column".into(),
            ));
        }
        let mut record_size = 0;
        for column in &columns {
            if column.max_length == 0 {
                return Err(DbError::InvalidArgument(format!(
                    "column {} must have a positive length",
                    column.name
                )));
            }
            record_size += column.max_length;
        }
        Ok(Self {
            name: name.into(),
            columns,
            record_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Sum of the column length budgets.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column_name)
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "Table {} (record size: {} bytes)\n",
            self.name, self.record_size
        );
        for column in &self.columns {
            out.push_str(&format!(
                "  - {} [{}, {} bytes]\n",
                column.name,
                column.column_type.keyword(),
                column.max_length
            ));
        }
        out
    }
}

/// Runtime state of a table: its schema, the ordered list of blocks it owns
/// and the live record count. Blocks are appended, never reordered.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    blocks: Vec<BlockAddress>,
    total_records: usize,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            blocks: Vec::new(),
            total_records: 0,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[BlockAddress] {
        &self.blocks
    }

    pub fn add_block(&mut self, addr: BlockAddress) {
        self.blocks.push(addr);
    }

    /// Registers a block recovered from disk together with its live records.
    pub fn add_existing_block(&mut self, addr: BlockAddress, record_count: usize) {
        self.blocks.push(addr);
        self.total_records += record_count;
    }

    pub fn last_block(&self) -> Option<&BlockAddress> {
        self.blocks.last()
    }

    pub fn increment_records(&mut self) {
        self.total_records += 1;
    }

    pub fn decrement_records(&mut self) -> DbResult<()> {
        if self.total_records == 0 {
            return Err(DbError::Logic("table record count underflow".into()));
        }
        self.total_records -= 1;
        Ok(())
    }
}
