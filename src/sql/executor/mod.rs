//! Pull-model execution.
//!
//! Every operator implements init -> next* -> close plus reset. The output
//! schema is fixed during init and stable until reset; init is idempotent.

pub mod ops;

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::common::ColumnType;
use crate::database::SharedDatabase;
use crate::sql::planner::{PhysicalOp, PhysicalPlan};

/// Column metadata inside an execution schema. `name` may be bare or
/// qualified; `table_name` carries the effective qualifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    pub source_index: usize,
    pub table_name: String,
}

/// Runtime schema: ordered columns plus a name dictionary mapping both bare
/// and "table.column" spellings (and any aliases) to column positions.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
    name_index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(&mut self, column: ColumnInfo) {
        let index = self.columns.len();
        self.name_index.insert(column.name.clone(), index);
        if !column.table_name.is_empty() {
            let bare = column
                .name
                .rsplit('.')
                .next()
                .unwrap_or(&column.name)
                .to_string();
            self.name_index.insert(bare.clone(), index);
            self.name_index
                .insert(format!("{}.{}", column.table_name, bare), index);
        }
        self.columns.push(column);
    }

    pub fn add_column_info(
        &mut self,
        name: impl Into<String>,
        column_type: ColumnType,
        source_index: usize,
        table_name: impl Into<String>,
    ) {
        self.add_column(ColumnInfo {
            name: name.into(),
            column_type,
            source_index,
            table_name: table_name.into(),
        });
    }

    /// Adds an alternate name for an existing column position.
    pub fn add_alias(&mut self, alias: impl Into<String>, index: usize) {
        self.name_index.insert(alias.into(), index);
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }
}

/// A row flowing through the pipeline: values in canonical text plus a shared
/// schema reference.
#[derive(Debug, Clone)]
pub struct Tuple {
    values: Vec<String>,
    schema: Rc<Schema>,
}

impl Tuple {
    pub fn new(values: Vec<String>, schema: Rc<Schema>) -> Self {
        Self { values, schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_rc(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }

    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn value_by_name(&self, name: &str) -> DbResult<&str> {
        let index = self
            .schema
            .find_column(name)
            .ok_or_else(|| DbError::NotFound(format!("column {}", name)))?;
        self.value(index)
            .ok_or_else(|| DbError::Logic(format!("tuple missing value for column {}", name)))
    }
}

/// The pull interface every physical operator implements.
pub trait Operator {
    /// Prepares the operator and fixes its output schema. Idempotent.
    fn init(&mut self) -> DbResult<()>;

    /// Produces the next tuple, or `None` when exhausted.
    fn next(&mut self) -> DbResult<Option<Tuple>>;

    /// Releases resources. A closed operator may be re-inited.
    fn close(&mut self) -> DbResult<()>;

    /// Output schema; valid after init until reset.
    fn schema(&self) -> Rc<Schema>;

    /// Returns the operator to its pre-init state (close followed by init
    /// yields the same tuple stream).
    fn reset(&mut self) -> DbResult<()>;
}

/// Materialized query result.
#[derive(Debug, Clone)]
pub struct ResultSet {
    schema: Rc<Schema>,
    tuples: Vec<Tuple>,
}

impl ResultSet {
    pub fn new(schema: Rc<Schema>) -> Self {
        Self {
            schema,
            tuples: Vec::new(),
        }
    }

    pub fn add_tuple(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.tuples.iter().map(|t| t.values().to_vec()).collect()
    }
}

impl Display for ResultSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let header: Vec<&str> = self
            .schema
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        writeln!(f, "| {} |", header.join(" | "))?;
        if self.tuples.is_empty() {
            return writeln!(f, "| (empty result) |");
        }
        for tuple in &self.tuples {
            writeln!(f, "| {} |", tuple.values().join(" | "))?;
        }
        Ok(())
    }
}

fn only_child(plan: &PhysicalPlan) -> DbResult<&PhysicalPlan> {
    plan.children
        .first()
        .ok_or_else(|| DbError::Logic(format!("{} node has no child", plan.op.name())))
}

fn both_children(plan: &PhysicalPlan) -> DbResult<(&PhysicalPlan, &PhysicalPlan)> {
    match plan.children.as_slice() {
        [left, right] => Ok((left, right)),
        other => Err(DbError::Logic(format!(
            "{} node has {} children, expected 2",
            plan.op.name(),
            other.len()
        ))),
    }
}

fn required_param(plan: &PhysicalPlan, key: &str) -> DbResult<String> {
    plan.param(key)
        .map(str::to_string)
        .ok_or_else(|| DbError::Logic(format!("{} node missing '{}'", plan.op.name(), key)))
}

/// Lowers a physical plan into an operator tree. Scan operators hold a clone
/// of the shared database handle for the duration of their pipeline.
pub fn build_operator(plan: &PhysicalPlan, db: &SharedDatabase) -> DbResult<Box<dyn Operator>> {
    match plan.op {
        PhysicalOp::TableScan => Ok(Box::new(ops::table_scan::TableScan::new(
            db.clone(),
            required_param(plan, "table")?,
        ))),
        PhysicalOp::IndexScan => Ok(Box::new(ops::index_scan::IndexScan::new(
            db.clone(),
            required_param(plan, "table")?,
            required_param(plan, "index")?,
            required_param(plan, "key")?,
        ))),
        PhysicalOp::Filter => Ok(Box::new(ops::filter::Filter::new(
            build_operator(only_child(plan)?, db)?,
            required_param(plan, "condition")?,
        ))),
        PhysicalOp::Projection => Ok(Box::new(ops::project::Projection::new(
            build_operator(only_child(plan)?, db)?,
            plan.output_columns.clone(),
        ))),
        PhysicalOp::Distinct => Ok(Box::new(ops::distinct::Distinct::new(build_operator(
            only_child(plan)?,
            db,
        )?))),
        PhysicalOp::Sort => Ok(Box::new(ops::sort::Sort::new(
            build_operator(only_child(plan)?, db)?,
            required_param(plan, "order_by")?,
        ))),
        PhysicalOp::NestedLoopJoin => {
            let (left, right) = both_children(plan)?;
            let join_type = plan
                .param("join_type")
                .map(crate::common::JoinType::parse_keyword)
                .unwrap_or(plan.join_type);
            Ok(Box::new(ops::join::NestedLoopJoin::new(
                build_operator(left, db)?,
                build_operator(right, db)?,
                plan.param("condition").unwrap_or_default().to_string(),
                join_type,
            )))
        }
        PhysicalOp::HashJoin => {
            let (left, right) = both_children(plan)?;
            let join_type = plan
                .param("join_type")
                .map(crate::common::JoinType::parse_keyword)
                .unwrap_or(plan.join_type);
            Ok(Box::new(ops::join::HashJoin::new(
                build_operator(left, db)?,
                build_operator(right, db)?,
                plan.param("condition").unwrap_or_default().to_string(),
                required_param(plan, "left_key")?,
                required_param(plan, "right_key")?,
                join_type,
            )))
        }
        PhysicalOp::Aggregate => Ok(Box::new(ops::aggregate::Aggregate::new(
            build_operator(only_child(plan)?, db)?,
            plan.param("group_by").unwrap_or_default().to_string(),
            plan.param("aggregates").unwrap_or_default().to_string(),
            plan.param("having").unwrap_or_default().to_string(),
        )?)),
        PhysicalOp::Limit => {
            let limit = plan
                .param("limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let offset = plan
                .param("offset")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            Ok(Box::new(ops::limit::Limit::new(
                build_operator(only_child(plan)?, db)?,
                limit,
                offset,
            )))
        }
        PhysicalOp::Alias => Ok(Box::new(ops::alias::Alias::new(
            build_operator(only_child(plan)?, db)?,
            required_param(plan, "alias")?,
        ))),
    }
}

/// Runs an operator tree to completion: init, drain, close.
pub fn run_to_result_set(root: &mut dyn Operator) -> DbResult<ResultSet> {
    root.init()?;
    let mut results = ResultSet::new(root.schema());
    while let Some(tuple) = root.next()? {
        results.add_tuple(tuple);
    }
    root.close()?;
    Ok(results)
}
