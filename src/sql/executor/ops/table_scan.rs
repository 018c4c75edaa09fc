//! Full table scan, block by block through the buffer pool.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::common::BlockAddress;
use crate::database::SharedDatabase;
use crate::sql::executor::{Operator, Schema, Tuple};

pub struct TableScan {
    db: SharedDatabase,
    table: String,
    schema: Rc<Schema>,
    blocks: Vec<BlockAddress>,
    next_block: usize,
    buffered: VecDeque<Tuple>,
    initialized: bool,
}

impl TableScan {
    pub fn new(db: SharedDatabase, table: String) -> Self {
        Self {
            db,
            table,
            schema: Rc::new(Schema::new()),
            blocks: Vec::new(),
            next_block: 0,
            buffered: VecDeque::new(),
            initialized: false,
        }
    }
}

impl Operator for TableScan {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        let guard = self.db.read();
        let table = guard.table(&self.table)?;
        let mut schema = Schema::new();
        for (i, column) in table.schema().columns().iter().enumerate() {
            schema.add_column_info(column.name.as_str(), column.column_type, i, self.table.as_str());
        }
        self.schema = Rc::new(schema);
        self.blocks = table.blocks().to_vec();
        drop(guard);
        self.next_block = 0;
        self.buffered.clear();
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("table scan next before init".into()));
        }
        loop {
            if let Some(tuple) = self.buffered.pop_front() {
                return Ok(Some(tuple));
            }
            if self.next_block >= self.blocks.len() {
                return Ok(None);
            }
            let addr = self.blocks[self.next_block].clone();
            self.next_block += 1;
            let records = self.db.write().read_block_records(&addr)?;
            for (_, record) in records {
                self.buffered
                    .push_back(Tuple::new(record.values, Rc::clone(&self.schema)));
            }
        }
    }

    fn close(&mut self) -> DbResult<()> {
        self.buffered.clear();
        self.next_block = 0;
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn reset(&mut self) -> DbResult<()> {
        self.buffered.clear();
        self.next_block = 0;
        self.initialized = false;
        Ok(())
    }
}
