//! Grouping and aggregation with optional HAVING.
//!
//! Parameter grammar (from the planner): `group_by` is a comma-separated
//! column list; `aggregates` is a `;`-separated list where each item is
//! either `FUNC:expr:alias` or the SQL-ish `FUNC(expr) AS alias`; `having`
//! is a condition over the produced (group columns, then aggregates) schema.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::common::errors::{DbError, DbResult};
use crate::common::ColumnType;
use crate::expr::{parse_expression, Expr, Value, ValueKind};
use crate::sql::executor::{ColumnInfo, Operator, Schema, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    Stddev,
    Variance,
}

impl AggFunc {
    fn parse(name: &str) -> DbResult<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SUM" => Ok(Self::Sum),
            "COUNT" => Ok(Self::Count),
            "AVG" => Ok(Self::Avg),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "STDDEV" | "STDDEV_POP" | "STDDEV_SAMP" => Ok(Self::Stddev),
            "VARIANCE" | "VAR" | "VAR_POP" | "VAR_SAMP" => Ok(Self::Variance),
            other => Err(DbError::InvalidArgument(format!(
                "unknown aggregate function: {}",
                other
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Stddev => "STDDEV",
            Self::Variance => "VARIANCE",
        }
    }
}

#[derive(Debug, Clone)]
struct PreparedAggregate {
    func: AggFunc,
    expression: String,
    alias: String,
    expr: Option<Expr>,
    result_type: ColumnType,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u64,
    int_sum: i64,
    double_sum: f64,
    sum_squares: f64,
    has_value: bool,
    extreme: Option<Value>,
}

fn find_case_insensitive(haystack: &str, needle_upper: &str) -> Option<usize> {
    haystack.to_ascii_uppercase().find(needle_upper)
}

/// One aggregate token: `FUNC:expr:alias`, `FUNC(expr) AS alias`,
/// `FUNC(expr)` or `FUNC expr`.
fn parse_aggregate_token(token: &str) -> DbResult<(AggFunc, String, String)> {
    let mut work = token.trim().to_string();
    if work.is_empty() {
        return Err(DbError::InvalidArgument("empty aggregate token".into()));
    }

    let mut func_part = String::new();
    let mut expr_part = String::new();
    let mut alias_part = String::new();
    if let Some(first_colon) = work.find(':') {
        func_part = work[..first_colon].trim().to_string();
        let rest = &work[first_colon + 1..];
        if let Some(second_colon) = rest.find(':') {
            expr_part = rest[..second_colon].trim().to_string();
            alias_part = rest[second_colon + 1..].trim().to_string();
        } else {
            expr_part = rest.trim().to_string();
        }
    } else {
        if let Some(as_pos) = find_case_insensitive(&work, " AS ") {
            alias_part = work[as_pos + 4..].trim().to_string();
            work = work[..as_pos].trim().to_string();
        } else if let Some(eq_pos) = work.find('=') {
            alias_part = work[eq_pos + 1..].trim().to_string();
            work = work[..eq_pos].trim().to_string();
        }
        if let (Some(lp), Some(rp)) = (work.find('('), work.rfind(')')) {
            if rp > lp {
                func_part = work[..lp].trim().to_string();
                expr_part = work[lp + 1..rp].trim().to_string();
            } else {
                return Err(DbError::InvalidArgument(format!(
                    "malformed aggregate '{}'",
                    token
                )));
            }
        } else if let Some(space) = work.find(' ') {
            func_part = work[..space].trim().to_string();
            expr_part = work[space + 1..].trim().to_string();
        } else {
            func_part = work.clone();
            expr_part = "*".to_string();
        }
    }

    let func = AggFunc::parse(&func_part)?;
    let mut expression = expr_part;
    if expression.is_empty() && func == AggFunc::Count {
        expression = "*".to_string();
    }
    if alias_part.is_empty() {
        let label = if expression.is_empty() {
            "*"
        } else {
            expression.as_str()
        };
        alias_part = format!("{}({})", func.name(), label);
    }
    Ok((func, expression, alias_part))
}

fn parse_group_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn infer_expression_type(expr: &Expr, schema: &Schema) -> ColumnType {
    match expr {
        Expr::Column(name) => schema
            .find_column(name)
            .map(|i| schema.column(i).column_type)
            .unwrap_or(ColumnType::String),
        Expr::Literal(value) => match value.kind {
            ValueKind::Int => ColumnType::Integer,
            ValueKind::Double => ColumnType::Double,
            _ => ColumnType::String,
        },
        Expr::Arith { left, right, .. } => {
            let l = infer_expression_type(left, schema);
            let r = infer_expression_type(right, schema);
            if l == ColumnType::Double || r == ColumnType::Double {
                ColumnType::Double
            } else {
                ColumnType::Integer
            }
        }
        Expr::Compare { .. } | Expr::Logical { .. } => ColumnType::String,
    }
}

pub struct Aggregate {
    child: Box<dyn Operator>,
    group_columns: Vec<String>,
    aggregates: Vec<PreparedAggregate>,
    having: String,
    group_indices: Vec<usize>,
    schema: Rc<Schema>,
    results: VecDeque<Tuple>,
    initialized: bool,
}

impl Aggregate {
    pub fn new(
        child: Box<dyn Operator>,
        group_by: String,
        aggregates: String,
        having: String,
    ) -> DbResult<Self> {
        let mut prepared = Vec::new();
        let normalized = aggregates.replace(';', "\n");
        for token in normalized.lines() {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (func, expression, alias) = parse_aggregate_token(token)?;
            prepared.push(PreparedAggregate {
                func,
                expression,
                alias,
                expr: None,
                result_type: ColumnType::Integer,
            });
        }
        Ok(Self {
            child,
            group_columns: parse_group_list(&group_by),
            aggregates: prepared,
            having: having.trim().to_string(),
            group_indices: Vec::new(),
            schema: Rc::new(Schema::new()),
            results: VecDeque::new(),
            initialized: false,
        })
    }

    fn prepare(&mut self, child_schema: &Schema) -> DbResult<()> {
        self.group_indices.clear();
        for name in &self.group_columns {
            let index = child_schema
                .find_column(name)
                .ok_or_else(|| DbError::NotFound(format!("group by column {}", name)))?;
            self.group_indices.push(index);
        }

        for agg in &mut self.aggregates {
            if agg.func == AggFunc::Count
                && (agg.expression.is_empty() || agg.expression == "*")
            {
                agg.expr = None;
                agg.result_type = ColumnType::Integer;
                continue;
            }
            if agg.expression.is_empty() {
                return Err(DbError::InvalidArgument(format!(
                    "aggregate expression missing for {}",
                    agg.alias
                )));
            }
            let expr = parse_expression(&agg.expression)?;
            let mut result_type = infer_expression_type(&expr, child_schema);
            match agg.func {
                AggFunc::Avg | AggFunc::Stddev | AggFunc::Variance => {
                    result_type = ColumnType::Double;
                }
                // Textual inputs silently promote to Double for SUM.
                AggFunc::Sum if result_type == ColumnType::String => {
                    result_type = ColumnType::Double;
                }
                _ => {}
            }
            agg.expr = Some(expr);
            agg.result_type = result_type;
        }
        Ok(())
    }

    fn build_output_schema(&self, child_schema: &Schema) -> Schema {
        let mut schema = Schema::new();
        for &index in &self.group_indices {
            let source = child_schema.column(index);
            schema.add_column(ColumnInfo {
                name: source.name.clone(),
                column_type: source.column_type,
                source_index: schema.column_count(),
                table_name: source.table_name.clone(),
            });
        }
        for agg in &self.aggregates {
            schema.add_column(ColumnInfo {
                name: agg.alias.clone(),
                column_type: agg.result_type,
                source_index: schema.column_count(),
                table_name: String::new(),
            });
        }
        schema
    }

    fn accumulate(&self, tuple: &Tuple, accumulators: &mut [Accumulator]) -> DbResult<()> {
        for (agg, acc) in self.aggregates.iter().zip(accumulators.iter_mut()) {
            match agg.func {
                AggFunc::Count => {
                    acc.count += 1;
                }
                AggFunc::Sum => {
                    let Some(expr) = &agg.expr else {
                        acc.count += 1;
                        continue;
                    };
                    let value = expr.evaluate(tuple)?;
                    if agg.result_type == ColumnType::Double {
                        acc.double_sum += value.as_double()?;
                    } else {
                        acc.int_sum += value.as_int()?;
                    }
                    acc.has_value = true;
                }
                AggFunc::Avg => {
                    let expr = agg.expr.as_ref().expect("AVG has an expression");
                    acc.double_sum += expr.evaluate(tuple)?.as_double()?;
                    acc.count += 1;
                    acc.has_value = true;
                }
                AggFunc::Stddev | AggFunc::Variance => {
                    let expr = agg.expr.as_ref().expect("aggregate has an expression");
                    let v = expr.evaluate(tuple)?.as_double()?;
                    acc.double_sum += v;
                    acc.sum_squares += v * v;
                    acc.count += 1;
                    acc.has_value = true;
                }
                AggFunc::Min | AggFunc::Max => {
                    let expr = agg.expr.as_ref().expect("aggregate has an expression");
                    let value = expr.evaluate(tuple)?;
                    match &acc.extreme {
                        None => {
                            acc.extreme = Some(value);
                            acc.has_value = true;
                        }
                        Some(current) => {
                            let ordering = value.compare(current);
                            let replace = match agg.func {
                                AggFunc::Min => ordering == std::cmp::Ordering::Less,
                                _ => ordering == std::cmp::Ordering::Greater,
                            };
                            if replace {
                                acc.extreme = Some(value);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn output_value(agg: &PreparedAggregate, acc: &Accumulator) -> String {
        match agg.func {
            AggFunc::Count => acc.count.to_string(),
            AggFunc::Sum => {
                if agg.result_type == ColumnType::Double {
                    acc.double_sum.to_string()
                } else {
                    acc.int_sum.to_string()
                }
            }
            AggFunc::Avg => {
                if acc.count == 0 {
                    "0".to_string()
                } else {
                    (acc.double_sum / acc.count as f64).to_string()
                }
            }
            AggFunc::Variance | AggFunc::Stddev => {
                if acc.count == 0 {
                    "0".to_string()
                } else {
                    let mean = acc.double_sum / acc.count as f64;
                    let variance = (acc.sum_squares / acc.count as f64 - mean * mean).max(0.0);
                    if agg.func == AggFunc::Variance {
                        variance.to_string()
                    } else {
                        variance.sqrt().to_string()
                    }
                }
            }
            AggFunc::Min | AggFunc::Max => acc
                .extreme
                .as_ref()
                .map(|v| v.as_display().to_string())
                .unwrap_or_else(|| "NULL".to_string()),
        }
    }
}

impl Operator for Aggregate {
    fn init(&mut self) -> DbResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        let child_schema = self.child.schema();
        self.prepare(&child_schema)?;
        let output_schema = Rc::new(self.build_output_schema(&child_schema));

        // HAVING parses only after the output schema exists, so aggregate
        // aliases resolve.
        let having_expr = if self.having.is_empty() {
            None
        } else {
            Some(parse_expression(&self.having)?)
        };

        let mut groups: HashMap<Vec<String>, Vec<Accumulator>> = HashMap::new();
        let mut group_order: Vec<Vec<String>> = Vec::new();
        while let Some(tuple) = self.child.next()? {
            let key: Vec<String> = self
                .group_indices
                .iter()
                .map(|&i| tuple.value(i).unwrap_or("NULL").to_string())
                .collect();
            if !groups.contains_key(&key) {
                groups.insert(key.clone(), vec![Accumulator::default(); self.aggregates.len()]);
                group_order.push(key.clone());
            }
            let accumulators = groups.get_mut(&key).expect("group just ensured");
            self.accumulate(&tuple, accumulators)?;
        }

        // Global aggregates yield exactly one row even on empty input.
        if self.group_indices.is_empty() && groups.is_empty() {
            groups.insert(Vec::new(), vec![Accumulator::default(); self.aggregates.len()]);
            group_order.push(Vec::new());
        }

        self.results.clear();
        for key in group_order {
            let accumulators = &groups[&key];
            let mut values = key.clone();
            for (agg, acc) in self.aggregates.iter().zip(accumulators.iter()) {
                values.push(Self::output_value(agg, acc));
            }
            let tuple = Tuple::new(values, Rc::clone(&output_schema));
            if let Some(having) = &having_expr {
                if !having.evaluate_bool(&tuple)? {
                    continue;
                }
            }
            self.results.push_back(tuple);
        }

        self.schema = output_schema;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.initialized {
            return Err(DbError::Logic("aggregate next before init".into()));
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
        Rc::clone(&self.schema)
    }

    fn reset(&mut self) -> DbResult<()> {
        self.child.reset()?;
        self.results.clear();
        self.initialized = false;
        Ok(())
    }
}
