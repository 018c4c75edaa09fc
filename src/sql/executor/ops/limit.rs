//! LIMIT/OFFSET. The offset is drained from the child during init; a limit
//! of zero means unbounded.

use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::sql::executor::{Operator, Schema, Tuple};

pub struct Limit {
    child: Box<dyn Operator>,
    limit: usize,
    offset: usize,
    yielded: usize,
    initialized: bool,
}

impl Limit {
    pub fn new(child: Box<dyn Operator>, limit: usize, offset: usize) -> Self {
        Self {
            child,
            limit,
            offset,
            yielded: 0,
            initialized: false,
        }
    }
}

impl Operator for Limit {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        for _ in 0..self.offset {
            if self.child.next()?.is_none() {
                break;
            }
        }
        self.yielded = 0;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("limit next before init".into()));
        }
        if self.limit > 0 && self.yielded >= self.limit {
            return Ok(None);
        }
        let tuple = self.child.next()?;
        if tuple.is_some() {
            self.yielded += 1;
        }
        Ok(tuple)
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()?;
        self.yielded = 0;
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        self.child.schema()
    }

    fn reset(&mut self) -> DbResult<()> {
        self.child.reset()?;
        self.yielded = 0;
        self.initialized = false;
        Ok(())
    }
}
