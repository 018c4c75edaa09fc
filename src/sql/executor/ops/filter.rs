//! Predicate filter.

use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::expr::{parse_expression, Expr};
use crate::sql::executor::{Operator, Schema, Tuple};

pub struct Filter {
    child: Box<dyn Operator>,
    condition: String,
    predicate: Option<Expr>,
    initialized: bool,
}

impl Filter {
    pub fn new(child: Box<dyn Operator>, condition: String) -> Self {
        Self {
            child,
            condition,
            predicate: None,
            initialized: false,
        }
    }
}

impl Operator for Filter {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        self.predicate = if self.condition.trim().is_empty() {
            None
        } else {
            Some(parse_expression(&self.condition)?)
        };
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("filter next before init".into()));
        }
        while let Some(tuple) = self.child.next()? {
            match &self.predicate {
                Some(predicate) if !predicate.evaluate_bool(&tuple)? => continue,
                _ => return Ok(Some(tuple)),
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()?;
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        self.child.schema()
    }

    fn reset(&mut self) -> DbResult<()> {
        self.child.reset()?;
        self.initialized = false;
        Ok(())
    }
}
