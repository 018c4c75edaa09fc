//! Duplicate elimination, preserving first-occurrence order.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::sql::executor::{Operator, Schema, Tuple};

/// Unit separator: cannot collide with value text the way a comma could.
const KEY_DELIMITER: char = '\u{1F}';

pub struct Distinct {
    child: Box<dyn Operator>,
    results: VecDeque<Tuple>,
    initialized: bool,
}

impl Distinct {
    pub fn new(child: Box<dyn Operator>) -> Self {
        Self {
            child,
            results: VecDeque::new(),
            initialized: false,
        }
    }
}

impl Operator for Distinct {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        self.results.clear();
        let mut seen = HashSet::new();
        while let Some(tuple) = self.child.next()? {
            let mut key = String::new();
            for value in tuple.values() {
                key.push_str(value);
                key.push(KEY_DELIMITER);
            }
            if seen.insert(key) {
                self.results.push_back(tuple);
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("distinct next before init".into()));
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
