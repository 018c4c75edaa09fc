//! Join operators: nested loops (inner, left, right) and inner hash join.

use std::collections::HashMap;
use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::common::JoinType;
use crate::expr::{parse_expression, Expr};
use crate::sql::executor::{Operator, Schema, Tuple};

fn combined_schema(left: &Schema, right: &Schema) -> Schema {
    let mut schema = Schema::new();
    for column in left.columns() {
        schema.add_column(column.clone());
    }
    for column in right.columns() {
        schema.add_column(column.clone());
    }
    schema
}

fn combine(left: &Tuple, right: &Tuple, schema: &Rc<Schema>) -> Tuple {
    let mut values = Vec::with_capacity(left.values().len() + right.values().len());
    values.extend(left.values().iter().cloned());
    values.extend(right.values().iter().cloned());
    Tuple::new(values, Rc::clone(schema))
}

/// Pads the missing side with the literal "NULL".
fn combine_with_nulls(
    null_left: bool,
    other: &Tuple,
    left_width: usize,
    right_width: usize,
    schema: &Rc<Schema>,
) -> Tuple {
    let mut values = Vec::with_capacity(left_width + right_width);
    if null_left {
        values.extend(std::iter::repeat("NULL".to_string()).take(left_width));
        values.extend(other.values().iter().cloned());
    } else {
        values.extend(other.values().iter().cloned());
        values.extend(std::iter::repeat("NULL".to_string()).take(right_width));
    }
    Tuple::new(values, Rc::clone(schema))
}

pub struct NestedLoopJoin {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    condition: String,
    join_type: JoinType,
    predicate: Option<Expr>,
    schema: Rc<Schema>,
    current_outer: Option<Tuple>,
    outer_matched: bool,
    initialized: bool,
}

impl NestedLoopJoin {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        condition: String,
        join_type: JoinType,
    ) -> Self {
        Self {
            left,
            right,
            condition,
            join_type,
            predicate: None,
            schema: Rc::new(Schema::new()),
            current_outer: None,
            outer_matched: false,
            initialized: false,
        }
    }

    fn left_width(&self) -> usize {
        self.left.schema().column_count()
    }

    fn right_width(&self) -> usize {
        self.right.schema().column_count()
    }
}

impl Operator for NestedLoopJoin {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.left.init()?;
        self.right.init()?;
        self.schema = Rc::new(combined_schema(&self.left.schema(), &self.right.schema()));
        self.predicate = if self.condition.trim().is_empty() {
            None
        } else {
            Some(parse_expression(&self.condition)?)
        };
        self.current_outer = None;
        self.outer_matched = false;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("join next before init".into()));
        }

        // RIGHT joins iterate the right side as the outer relation and reset
        // the left side per outer tuple; INNER/LEFT are the mirror image.
        if self.join_type == JoinType::Right {
            loop {
                if self.current_outer.is_none() {
                    self.current_outer = self.right.next()?;
                    self.outer_matched = false;
                    if self.current_outer.is_none() {
                        return Ok(None);
                    }
                    self.left.reset()?;
                    self.left.init()?;
                }
                let outer = self.current_outer.clone().expect("outer tuple present");
                while let Some(inner) = self.left.next()? {
                    let candidate = combine(&inner, &outer, &self.schema);
                    if let Some(predicate) = &self.predicate {
                        if !predicate.evaluate_bool(&candidate)? {
                            continue;
                        }
                    }
                    self.outer_matched = true;
                    return Ok(Some(candidate));
                }
                if !self.outer_matched {
                    let padded = combine_with_nulls(
                        true,
                        &outer,
                        self.left_width(),
                        self.right_width(),
                        &self.schema,
                    );
                    self.current_outer = None;
                    return Ok(Some(padded));
                }
                self.current_outer = None;
            }
        }

        loop {
            if self.current_outer.is_none() {
                self.current_outer = self.left.next()?;
                self.outer_matched = false;
                if self.current_outer.is_none() {
                    return Ok(None);
                }
                self.right.reset()?;
                self.right.init()?;
            }
            let outer = self.current_outer.clone().expect("outer tuple present");
            while let Some(inner) = self.right.next()? {
                let candidate = combine(&outer, &inner, &self.schema);
                if let Some(predicate) = &self.predicate {
                    if !predicate.evaluate_bool(&candidate)? {
                        continue;
                    }
                }
                self.outer_matched = true;
                return Ok(Some(candidate));
            }
            if !self.outer_matched && self.join_type == JoinType::Left {
                let padded = combine_with_nulls(
                    false,
                    &outer,
                    self.left_width(),
                    self.right_width(),
                    &self.schema,
                );
                self.current_outer = None;
                return Ok(Some(padded));
            }
            self.current_outer = None;
        }
    }

    fn close(&mut self) -> DbResult<()> {
        self.left.close()?;
        self.right.close()?;
        self.current_outer = None;
        self.outer_matched = false;
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn reset(&mut self) -> DbResult<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.current_outer = None;
        self.outer_matched = false;
        self.initialized = false;
        Ok(())
    }
}

/// Inner-only hash join. The right input is materialized into a multi-map
/// during init (and closed immediately after); keys are compared as raw
/// strings with no type coercion.
pub struct HashJoin {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    condition: String,
    left_key: String,
    right_key: String,
    join_type: JoinType,
    predicate: Option<Expr>,
    schema: Rc<Schema>,
    hash_table: HashMap<String, Vec<Tuple>>,
    current_left: Option<Tuple>,
    current_matches: Vec<Tuple>,
    match_index: usize,
    initialized: bool,
}

impl HashJoin {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        condition: String,
        left_key: String,
        right_key: String,
        join_type: JoinType,
    ) -> Self {
        Self {
            left,
            right,
            condition,
            left_key,
            right_key,
            join_type,
            predicate: None,
            schema: Rc::new(Schema::new()),
            hash_table: HashMap::new(),
            current_left: None,
            current_matches: Vec::new(),
            match_index: 0,
            initialized: false,
        }
    }
}

impl Operator for HashJoin {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        if self.join_type != JoinType::Inner {
            return Err(DbError::Logic(
                "hash join supports only inner joins".into(),
            ));
        }

        self.right.init()?;
        let right_schema = self.right.schema();
        self.hash_table.clear();
        while let Some(tuple) = self.right.next()? {
            let key = tuple.value_by_name(&self.right_key)?.to_string();
            self.hash_table.entry(key).or_default().push(tuple);
        }
        self.right.close()?;

        self.left.init()?;
        self.schema = Rc::new(combined_schema(&self.left.schema(), &right_schema));
        self.predicate = if self.condition.trim().is_empty() {
            None
        } else {
            Some(parse_expression(&self.condition)?)
        };
        self.current_left = None;
        self.current_matches.clear();
        self.match_index = 0;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("hash join next before init".into()));
        }
        loop {
            if self.current_left.is_none() {
                let Some(tuple) = self.left.next()? else {
                    return Ok(None);
                };
                let key = tuple.value_by_name(&self.left_key)?.to_string();
                self.current_matches = self.hash_table.get(&key).cloned().unwrap_or_default();
                self.match_index = 0;
                self.current_left = Some(tuple);
            }

            let outer = self.current_left.clone().expect("left tuple present");
            while self.match_index < self.current_matches.len() {
                let inner = &self.current_matches[self.match_index];
                self.match_index += 1;
                let candidate = combine(&outer, inner, &self.schema);
                if let Some(predicate) = &self.predicate {
                    if !predicate.evaluate_bool(&candidate)? {
                        continue;
                    }
                }
                return Ok(Some(candidate));
            }

            self.current_left = None;
            self.current_matches.clear();
        }
    }

    fn close(&mut self) -> DbResult<()> {
        self.left.close()?;
        self.right.close()?;
        self.hash_table.clear();
        self.current_left = None;
        self.current_matches.clear();
        self.match_index = 0;
        self.initialized = false;
        Ok(())
    }

    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn reset(&mut self) -> DbResult<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.hash_table.clear();
        self.current_left = None;
        self.current_matches.clear();
        self.match_index = 0;
        self.initialized = false;
        Ok(())
    }
}
