//! Column projection: a reordered subset of the child's columns.

use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::sql::executor::{ColumnInfo, Operator, Schema, Tuple};

pub struct Projection {
    child: Box<dyn Operator>,
    columns: Vec<String>,
    indices: Vec<usize>,
    schema: Rc<Schema>,
    initialized: bool,
}

impl Projection {
    pub fn new(child: Box<dyn Operator>, columns: Vec<String>) -> Self {
        Self {
            child,
            columns,
            indices: Vec::new(),
            schema: Rc::new(Schema::new()),
            initialized: false,
        }
    }
}

impl Operator for Projection {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        let child_schema = self.child.schema();
        self.indices.clear();
        let mut schema = Schema::new();
        for name in &self.columns {
            let index = child_schema
                .find_column(name)
                .ok_or_else(|| DbError::NotFound(format!("column {}", name)))?;
            self.indices.push(index);
            let source = child_schema.column(index);
            schema.add_column(ColumnInfo {
                name: source.name.clone(),
                column_type: source.column_type,
                source_index: schema.column_count(),
                table_name: source.table_name.clone(),
            });
        }
        self.schema = Rc::new(schema);
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("projection next before init".into()));
        }
        let Some(tuple) = self.child.next()? else {
            return Ok(None);
        };
        let values = self
            .indices
            .iter()
            .map(|&i| tuple.value(i).unwrap_or("NULL").to_string())
            .collect();
        Ok(Some(Tuple::new(values, Rc::clone(&self.schema))))
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
