//! Physical plan generation: scan method and join method selection plus the
//! integer cost model.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::common::JoinType;
use crate::expr::{parse_expression, CompareOp, Expr};

use super::logical::LogicalPlan;

/// Catalog facts the generator needs: table sizes and index availability.
pub trait PlannerContext {
    fn table_block_count(&self, table: &str) -> Option<usize>;
    fn find_index_for_column(&self, table: &str, column: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalOp {
    TableScan,
    IndexScan,
    Filter,
    Projection,
    Distinct,
    NestedLoopJoin,
    HashJoin,
    Sort,
    Aggregate,
    Limit,
    Alias,
}

impl PhysicalOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TableScan => "TableScan",
            Self::IndexScan => "IndexScan",
            Self::Filter => "Filter",
            Self::Projection => "Projection",
            Self::Distinct => "Distinct",
            Self::NestedLoopJoin => "NestedLoopJoin",
            Self::HashJoin => "HashJoin",
            Self::Sort => "Sort",
            Self::Aggregate => "Aggregate",
            Self::Limit => "Limit",
            Self::Alias => "Alias",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub op: PhysicalOp,
    pub description: String,
    pub algorithm: &'static str,
    pub parameters: BTreeMap<String, String>,
    pub output_columns: Vec<String>,
    pub join_type: JoinType,
    pub estimated_cost: i64,
    pub children: Vec<PhysicalPlan>,
}

impl PhysicalPlan {
    fn new(op: PhysicalOp, description: impl Into<String>, algorithm: &'static str) -> Self {
        Self {
            op,
            description: description.into(),
            algorithm,
            parameters: BTreeMap::new(),
            output_columns: Vec::new(),
            join_type: JoinType::Inner,
            estimated_cost: 0,
            children: Vec::new(),
        }
    }

    fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    fn fmt_at(&self, f: &mut Formatter<'_>, depth: usize) -> FmtResult {
        writeln!(
            f,
            "{:width$}{} [{}] cost={} ({})",
            "",
            self.op.name(),
            self.algorithm,
            self.estimated_cost,
            self.description,
            width = depth * 2
        )?;
        for child in &self.children {
            child.fmt_at(f, depth + 1)?;
        }
        Ok(())
    }
}

impl Display for PhysicalPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        self.fmt_at(f, 0)
    }
}

/// Per-node cost: pipeline operators are cheap, joins and sorts dominate.
fn node_cost(plan: &PhysicalPlan) -> i64 {
    match plan.op {
        PhysicalOp::TableScan => plan
            .param("blocks")
            .and_then(|b| b.parse().ok())
            .unwrap_or(100),
        PhysicalOp::IndexScan => 10,
        PhysicalOp::Filter | PhysicalOp::Projection | PhysicalOp::Distinct => 1,
        PhysicalOp::NestedLoopJoin => 1000,
        PhysicalOp::HashJoin => 200,
        PhysicalOp::Sort => 150,
        PhysicalOp::Aggregate => 120,
        PhysicalOp::Limit | PhysicalOp::Alias => 1,
    }
}

fn estimate_cost(plan: &PhysicalPlan) -> i64 {
    node_cost(plan) + plan.children.iter().map(estimate_cost).sum::<i64>()
}

/// `column = literal` (either side) from a canonical condition string.
fn extract_column_literal_equality(condition: &str) -> Option<(String, String)> {
    let expr = parse_expression(condition).ok()?;
    let Expr::Compare { op, left, right } = expr else {
        return None;
    };
    if op != CompareOp::Eq {
        return None;
    }
    match (*left, *right) {
        (Expr::Column(column), Expr::Literal(value)) => Some((column, value.text)),
        (Expr::Literal(value), Expr::Column(column)) => Some((column, value.text)),
        _ => None,
    }
}

/// `column = column` from a canonical condition string.
fn extract_join_columns(condition: &str) -> Option<(String, String)> {
    let expr = parse_expression(condition).ok()?;
    let Expr::Compare { op, left, right } = expr else {
        return None;
    };
    if op != CompareOp::Eq {
        return None;
    }
    match (*left, *right) {
        (Expr::Column(left_col), Expr::Column(right_col)) => Some((left_col, right_col)),
        _ => None,
    }
}

fn strip_table_prefix(name: &str) -> &str {
    match name.split_once('.') {
        Some((_, column)) if !column.is_empty() => column,
        _ => name,
    }
}

fn scan_node(table: &str, ctx: &dyn PlannerContext) -> PhysicalPlan {
    let mut node = PhysicalPlan::new(
        PhysicalOp::TableScan,
        format!("Scan table: {}", table),
        "Sequential scan (block-by-block)",
    )
    .with_param("table", table);
    if let Some(blocks) = ctx.table_block_count(table) {
        node.parameters
            .insert("blocks".to_string(), blocks.to_string());
    }
    node
}

fn join_node(condition: &str, join_type: JoinType) -> PhysicalPlan {
    if join_type != JoinType::Inner {
        let mut node = PhysicalPlan::new(
            PhysicalOp::NestedLoopJoin,
            format!("{} join: {}", join_type, condition),
            "Nested loop (outer join capable)",
        )
        .with_param("condition", condition)
        .with_param("join_type", join_type.keyword());
        node.join_type = join_type;
        return node;
    }
    if let Some((left_key, right_key)) = extract_join_columns(condition) {
        return PhysicalPlan::new(
            PhysicalOp::HashJoin,
            format!("Hash join: {}", condition),
            "Hash join",
        )
        .with_param("condition", condition)
        .with_param("left_key", left_key)
        .with_param("right_key", right_key)
        .with_param("join_type", "INNER");
    }
    PhysicalPlan::new(
        PhysicalOp::NestedLoopJoin,
        format!("Join: {}", condition),
        "Block nested loop join",
    )
    .with_param("condition", condition)
    .with_param("join_type", "INNER")
}

fn convert(plan: &LogicalPlan, ctx: &dyn PlannerContext) -> PhysicalPlan {
    let mut node = match plan {
        LogicalPlan::Scan { table } => scan_node(table, ctx),
        LogicalPlan::Select { condition, input } => {
            // Equality on an indexed column over a bare scan collapses the
            // selection and the scan into a single index lookup.
            if let LogicalPlan::Scan { table } = input.as_ref() {
                if let Some((column, key)) = extract_column_literal_equality(condition) {
                    let column = strip_table_prefix(&column);
                    if let Some(index) = ctx.find_index_for_column(table, column) {
                        let mut node = PhysicalPlan::new(
                            PhysicalOp::IndexScan,
                            format!("Index scan on {} using {}", table, index),
                            "B+ tree equality lookup",
                        )
                        .with_param("table", table.as_str())
                        .with_param("index", index)
                        .with_param("key", key);
                        node.estimated_cost = estimate_cost(&node);
                        return node;
                    }
                }
            }
            let mut node = PhysicalPlan::new(
                PhysicalOp::Filter,
                format!("Filter: {}", condition),
                "Predicate evaluation",
            )
            .with_param("condition", condition.as_str());
            node.children.push(convert(input, ctx));
            node.estimated_cost = estimate_cost(&node);
            return node;
        }
        LogicalPlan::Project { columns, .. } => {
            let mut node = PhysicalPlan::new(
                PhysicalOp::Projection,
                "Project columns",
                "Column extraction",
            );
            node.output_columns = columns.clone();
            node
        }
        LogicalPlan::Distinct { .. } => PhysicalPlan::new(
            PhysicalOp::Distinct,
            "Distinct",
            "Hash-based deduplication",
        ),
        LogicalPlan::Join {
            condition,
            join_type,
            ..
        } => join_node(condition, *join_type),
        LogicalPlan::CrossProduct { .. } => {
            let mut node = PhysicalPlan::new(
                PhysicalOp::NestedLoopJoin,
                "Cross product",
                "Nested loop (block-based)",
            )
            .with_param("join_type", "INNER");
            node.join_type = JoinType::Inner;
            node
        }
        LogicalPlan::Sort { order_by, .. } => PhysicalPlan::new(
            PhysicalOp::Sort,
            "Sort results",
            "In-memory sort",
        )
        .with_param("order_by", order_by.as_str()),
        LogicalPlan::Group {
            group_columns,
            aggregates,
            having,
            ..
        } => {
            let mut node = PhysicalPlan::new(
                PhysicalOp::Aggregate,
                "Aggregate",
                "Hash aggregation",
            )
            .with_param("group_by", group_columns.join(","))
            .with_param(
                "aggregates",
                aggregates
                    .iter()
                    .map(|a| a.encode())
                    .collect::<Vec<_>>()
                    .join(";"),
            );
            if let Some(having) = having {
                node.parameters
                    .insert("having".to_string(), having.clone());
            }
            node
        }
        LogicalPlan::Limit { limit, offset, .. } => PhysicalPlan::new(
            PhysicalOp::Limit,
            format!("Limit {} offset {}", limit, offset),
            "Row budget",
        )
        .with_param("limit", limit.to_string())
        .with_param("offset", offset.to_string()),
        LogicalPlan::Rename { alias, .. } => PhysicalPlan::new(
            PhysicalOp::Alias,
            format!("Alias {}", alias),
            "Qualifier rewrite",
        )
        .with_param("alias", alias.as_str()),
    };

    // Convert children for every operator that did not return early.
    match plan {
        LogicalPlan::Scan { .. } | LogicalPlan::Select { .. } => {}
        LogicalPlan::Project { input, .. }
        | LogicalPlan::Distinct { input }
        | LogicalPlan::Sort { input, .. }
        | LogicalPlan::Group { input, .. }
        | LogicalPlan::Limit { input, .. }
        | LogicalPlan::Rename { input, .. } => {
            node.children.push(convert(input, ctx));
        }
        LogicalPlan::Join { left, right, .. } | LogicalPlan::CrossProduct { left, right } => {
            node.children.push(convert(left, ctx));
            node.children.push(convert(right, ctx));
        }
    }

    node.estimated_cost = estimate_cost(&node);
    node
}

pub fn generate_physical_plan(plan: &LogicalPlan, ctx: &dyn PlannerContext) -> PhysicalPlan {
    convert(plan, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeContext {
        blocks: usize,
        indexed: Vec<(&'static str, &'static str, &'static str)>,
    }

    impl PlannerContext for FakeContext {
        fn table_block_count(&self, _table: &str) -> Option<usize> {
            Some(self.blocks)
        }

        fn find_index_for_column(&self, table: &str, column: &str) -> Option<String> {
            self.indexed
                .iter()
                .find(|(t, c, _)| *t == table && *c == column)
                .map(|(_, _, idx)| idx.to_string())
        }
    }

    fn ctx() -> FakeContext {
        FakeContext {
            blocks: 4,
            indexed: vec![("users", "id", "idx_users_id")],
        }
    }

    fn scan(table: &str) -> Box<LogicalPlan> {
        Box::new(LogicalPlan::Scan {
            table: table.into(),
        })
    }

    #[test]
    fn equality_on_indexed_column_becomes_index_scan() {
        let plan = LogicalPlan::Select {
            condition: "users.id = 2".into(),
            input: scan("users"),
        };
        let physical = generate_physical_plan(&plan, &ctx());
        assert_eq!(physical.op, PhysicalOp::IndexScan);
        assert_eq!(physical.param("index"), Some("idx_users_id"));
        assert_eq!(physical.param("key"), Some("2"));
        assert_eq!(physical.estimated_cost, 10);
        assert!(physical.children.is_empty());
    }

    #[test]
    fn non_indexed_predicates_stay_filters() {
        let plan = LogicalPlan::Select {
            condition: "users.age > 30".into(),
            input: scan("users"),
        };
        let physical = generate_physical_plan(&plan, &ctx());
        assert_eq!(physical.op, PhysicalOp::Filter);
        assert_eq!(physical.children[0].op, PhysicalOp::TableScan);
        // Filter(1) + scan(4 blocks).
        assert_eq!(physical.estimated_cost, 5);
    }

    #[test]
    fn equi_join_chooses_hash_join() {
        let plan = LogicalPlan::Join {
            condition: "users.id = orders.user_id".into(),
            join_type: JoinType::Inner,
            left: scan("users"),
            right: scan("orders"),
        };
        let physical = generate_physical_plan(&plan, &ctx());
        assert_eq!(physical.op, PhysicalOp::HashJoin);
        assert_eq!(physical.param("left_key"), Some("users.id"));
        assert_eq!(physical.param("right_key"), Some("orders.user_id"));
        assert_eq!(physical.estimated_cost, 200 + 4 + 4);
    }

    #[test]
    fn outer_joins_always_use_nested_loops() {
        let plan = LogicalPlan::Join {
            condition: "users.id = purchases.user_id".into(),
            join_type: JoinType::Left,
            left: scan("users"),
            right: scan("purchases"),
        };
        let physical = generate_physical_plan(&plan, &ctx());
        assert_eq!(physical.op, PhysicalOp::NestedLoopJoin);
        assert_eq!(physical.join_type, JoinType::Left);
        assert_eq!(physical.param("join_type"), Some("LEFT"));
    }

    #[test]
    fn non_equi_join_uses_nested_loops() {
        let plan = LogicalPlan::Join {
            condition: "a.x < b.y".into(),
            join_type: JoinType::Inner,
            left: scan("a"),
            right: scan("b"),
        };
        let physical = generate_physical_plan(&plan, &ctx());
        assert_eq!(physical.op, PhysicalOp::NestedLoopJoin);
        assert_eq!(physical.estimated_cost, 1000 + 8);
    }

    #[test]
    fn aggregate_parameters_are_encoded() {
        let plan = LogicalPlan::Group {
            group_columns: vec!["region".into()],
            aggregates: vec![
                super::super::logical::AggregateSpec {
                    function: "COUNT".into(),
                    argument: "*".into(),
                    alias: "cnt".into(),
                },
                super::super::logical::AggregateSpec {
                    function: "SUM".into(),
                    argument: "amount".into(),
                    alias: "total".into(),
                },
            ],
            having: Some("cnt > 2".into()),
            input: scan("sales"),
        };
        let physical = generate_physical_plan(&plan, &ctx());
        assert_eq!(physical.op, PhysicalOp::Aggregate);
        assert_eq!(physical.param("group_by"), Some("region"));
        assert_eq!(
            physical.param("aggregates"),
            Some("COUNT:*:cnt;SUM:amount:total")
        );
        assert_eq!(physical.param("having"), Some("cnt > 2"));
        assert_eq!(physical.estimated_cost, 120 + 4);
    }

    #[test]
    fn cost_accumulates_over_the_subtree() {
        let plan = LogicalPlan::Sort {
            order_by: "name ASC".into(),
            input: Box::new(LogicalPlan::Distinct {
                input: scan("users"),
            }),
        };
        let physical = generate_physical_plan(&plan, &ctx());
        assert_eq!(physical.estimated_cost, 150 + 1 + 4);
    }
}
