//! Single-key index lookup: yields zero or one tuple.

use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::database::SharedDatabase;
use crate::sql::executor::{Operator, Schema, Tuple};

pub struct IndexScan {
    db: SharedDatabase,
    table: String,
    index: String,
    key: String,
    schema: Rc<Schema>,
    result: Option<Tuple>,
    initialized: bool,
}

impl IndexScan {
    pub fn new(db: SharedDatabase, table: String, index: String, key: String) -> Self {
        Self {
            db,
            table,
            index,
            key,
            schema: Rc::new(Schema::new()),
            result: None,
            initialized: false,
        }
    }
}

impl Operator for IndexScan {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        {
            let guard = self.db.read();
            let table = guard.table(&self.table)?;
            let mut schema = Schema::new();
            for (i, column) in table.schema().columns().iter().enumerate() {
                schema.add_column_info(column.name.as_str(), column.column_type, i, self.table.as_str());
            }
            self.schema = Rc::new(schema);
        }
        let pointer = self.db.read().search_index(&self.index, &self.key)?;
        self.result = match pointer {
            Some(ptr) => self
                .db
                .write()
                .read_record(&ptr.address, ptr.slot)?
                .map(|record| Tuple::new(record.values, Rc::clone(&self.schema))),
            None => None,
        };
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("index scan next before init".into()));
        }
        Ok(self.result.take())
    }

    fn close(&mut self) -> DbResult<()> {
        self.result = None;
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn reset(&mut self) -> DbResult<()> {
        self.result = None;
        self.initialized = false;
        Ok(())
    }
}
