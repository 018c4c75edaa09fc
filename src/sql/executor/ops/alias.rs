//! Table-alias operator: rewrites the effective qualifier of every column
//! and keeps the original qualified names resolvable.

use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::sql::executor::{ColumnInfo, Operator, Schema, Tuple};

pub struct Alias {
    child: Box<dyn Operator>,
    alias: String,
    schema: Rc<Schema>,
    initialized: bool,
}

impl Alias {
    pub fn new(child: Box<dyn Operator>, alias: String) -> Self {
        Self {
            child,
            alias,
            schema: Rc::new(Schema::new()),
            initialized: false,
        }
    }
}

impl Operator for Alias {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        let child_schema = self.child.schema();
        let mut schema = Schema::new();
        for (index, column) in child_schema.columns().iter().enumerate() {
            let bare = column
                .name
                .rsplit('.')
                .next()
                .unwrap_or(&column.name)
                .to_string();
            schema.add_column(ColumnInfo {
                name: bare.clone(),
                column_type: column.column_type,
                source_index: column.source_index,
                table_name: self.alias.clone(),
            });
            // The pre-alias qualified spelling keeps resolving.
            if !column.table_name.is_empty() {
                schema.add_alias(format!("{}.{}", column.table_name, bare), index);
            }
        }
        self.schema = Rc::new(schema);
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("alias next before init".into()));
        }
        let Some(tuple) = self.child.next()? else {
            return Ok(None);
        };
        Ok(Some(Tuple::new(
            tuple.into_values(),
            Rc::clone(&self.schema),
        )))
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()?;
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn reset(&mut self) -> DbResult<()> {
        self.child.reset()?;
        self.initialized = false;
        Ok(())
    }
}
