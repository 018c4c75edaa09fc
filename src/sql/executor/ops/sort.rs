//! Materializing sort with typed, per-key-direction comparison.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::expr::Value;
use crate::sql::executor::{Operator, Schema, Tuple};

struct SortKey {
    index: usize,
    ascending: bool,
}

pub struct Sort {
    child: Box<dyn Operator>,
    order_by: String,
    results: VecDeque<Tuple>,
    initialized: bool,
}

impl Sort {
    pub fn new(child: Box<dyn Operator>, order_by: String) -> Self {
        Self {
            child,
            order_by,
            results: VecDeque::new(),
            initialized: false,
        }
    }

    /// Parses "col [ASC|DESC], ..." against the child schema.
    fn resolve_keys(&self, schema: &Schema) -> DbResult<Vec<SortKey>> {
        let mut keys = Vec::new();
        for part in self.order_by.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (column, direction) = match part.rsplit_once(' ') {
                Some((column, direction)) => (column.trim(), direction.trim()),
                None => (part, ""),
            };
            let (column, ascending) = match direction.to_ascii_uppercase().as_str() {
                "DESC" | "DESCENDING" => (column, false),
                "ASC" | "ASCENDING" => (column, true),
                _ => (part, true),
            };
            let index = schema
                .find_column(column)
                .ok_or_else(|| DbError::NotFound(format!("sort column {}", column)))?;
            keys.push(SortKey { index, ascending });
        }
        Ok(keys)
    }
}

impl Operator for Sort {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        let schema = self.child.schema();
        let keys = self.resolve_keys(&schema)?;

        let mut tuples = Vec::new();
        while let Some(tuple) = self.child.next()? {
            tuples.push(tuple);
        }

        tuples.sort_by(|a, b| {
            for key in &keys {
                let column_type = schema.column(key.index).column_type;
                let left = Value::from_column(a.value(key.index).unwrap_or("NULL"), column_type);
                let right = Value::from_column(b.value(key.index).unwrap_or("NULL"), column_type);
                let ordering = left.compare(&right);
                let ordering = if key.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        self.results = tuples.into();
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("sort next before init".into()));
        }
        Ok(self.results.pop_front())
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()?;
        self.results.clear();
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        self.child.schema()
    }

    fn reset(&mut self) -> DbResult<()> {
        self.child.reset()?;
        self.results.clear();
        self.initialized = false;
        Ok(())
    }
}
