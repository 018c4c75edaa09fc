//! Relational-algebra IR and the lowering from the AST.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::common::errors::{DbError, DbResult};
use crate::common::JoinType;
use crate::expr::Expr;
use crate::sql::ast::{
    is_aggregate_function, FromElement, SelectItem, SelectStatement, TableRef,
};

/// One aggregate in a Group node: function, argument expression text, alias.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub function: String,
    pub argument: String,
    pub alias: String,
}

impl AggregateSpec {
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.function, self.argument, self.alias)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    Scan {
        table: String,
    },
    Select {
        condition: String,
        input: Box<LogicalPlan>,
    },
    Project {
        columns: Vec<String>,
        input: Box<LogicalPlan>,
    },
    Distinct {
        input: Box<LogicalPlan>,
    },
    Join {
        condition: String,
        join_type: JoinType,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    CrossProduct {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    Sort {
        order_by: String,
        input: Box<LogicalPlan>,
    },
    Group {
        group_columns: Vec<String>,
        aggregates: Vec<AggregateSpec>,
        having: Option<String>,
        input: Box<LogicalPlan>,
    },
    Limit {
        limit: usize,
        offset: usize,
        input: Box<LogicalPlan>,
    },
    Rename {
        alias: String,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    fn indent(f: &mut Formatter<'_>, depth: usize) -> FmtResult {
        write!(f, "{:width$}", "", width = depth * 2)
    }

    fn fmt_at(&self, f: &mut Formatter<'_>, depth: usize) -> FmtResult {
        Self::indent(f, depth)?;
        match self {
            Self::Scan { table } => writeln!(f, "σ-scan {}", table)?,
            Self::Select { condition, input } => {
                writeln!(f, "σ {}", condition)?;
                input.fmt_at(f, depth + 1)?;
            }
            Self::Project { columns, input } => {
                writeln!(f, "π {}", columns.join(", "))?;
                input.fmt_at(f, depth + 1)?;
            }
            Self::Distinct { input } => {
                writeln!(f, "δ distinct")?;
                input.fmt_at(f, depth + 1)?;
            }
            Self::Join {
                condition,
                join_type,
                left,
                right,
            } => {
                writeln!(f, "⋈ {} [{}]", condition, join_type)?;
                left.fmt_at(f, depth + 1)?;
                right.fmt_at(f, depth + 1)?;
            }
            Self::CrossProduct { left, right } => {
                writeln!(f, "× cross")?;
                left.fmt_at(f, depth + 1)?;
                right.fmt_at(f, depth + 1)?;
            }
            Self::Sort { order_by, input } => {
                writeln!(f, "τ {}", order_by)?;
                input.fmt_at(f, depth + 1)?;
            }
            Self::Group {
                group_columns,
                aggregates,
                having,
                input,
            } => {
                let aggs = aggregates
                    .iter()
                    .map(|a| a.encode())
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "γ [{}] [{}]", group_columns.join(", "), aggs)?;
                if let Some(having) = having {
                    write!(f, " having {}", having)?;
                }
                writeln!(f)?;
                input.fmt_at(f, depth + 1)?;
            }
            Self::Limit {
                limit,
                offset,
                input,
            } => {
                writeln!(f, "λ limit {} offset {}", limit, offset)?;
                input.fmt_at(f, depth + 1)?;
            }
            Self::Rename { alias, input } => {
                writeln!(f, "ρ {}", alias)?;
                input.fmt_at(f, depth + 1)?;
            }
        }
        Ok(())
    }
}

impl Display for LogicalPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        self.fmt_at(f, 0)
    }
}

fn condition_text(expr: &Expr) -> String {
    expr.to_string()
}

fn lower_table_ref(table_ref: &TableRef) -> DbResult<LogicalPlan> {
    match table_ref {
        TableRef::Named { name, alias } => {
            let scan = LogicalPlan::Scan {
                table: name.clone(),
            };
            Ok(match alias {
                Some(alias) => LogicalPlan::Rename {
                    alias: alias.clone(),
                    input: Box::new(scan),
                },
                None => scan,
            })
        }
        TableRef::Derived { query, alias } => Ok(LogicalPlan::Rename {
            alias: alias.clone(),
            input: Box::new(build_logical_plan(query)?),
        }),
    }
}

/// Lowers a SELECT statement bottom-up: FROM, WHERE, GROUP/HAVING,
/// projection, DISTINCT, ORDER BY, LIMIT.
pub fn build_logical_plan(select: &SelectStatement) -> DbResult<LogicalPlan> {
    let mut plan = lower_table_ref(&select.from.first)?;
    for element in &select.from.rest {
        match element {
            FromElement::Comma(table) => {
                plan = LogicalPlan::CrossProduct {
                    left: Box::new(plan),
                    right: Box::new(lower_table_ref(table)?),
                };
            }
            FromElement::Join {
                join_type,
                table,
                on,
            } => {
                plan = LogicalPlan::Join {
                    condition: on.as_ref().map(condition_text).unwrap_or_default(),
                    join_type: *join_type,
                    left: Box::new(plan),
                    right: Box::new(lower_table_ref(table)?),
                };
            }
        }
    }

    if let Some(where_clause) = &select.where_clause {
        plan = LogicalPlan::Select {
            condition: condition_text(where_clause),
            input: Box::new(plan),
        };
    }

    let aggregates: Vec<AggregateSpec> = select
        .items
        .iter()
        .filter_map(|item| match item {
            SelectItem::FunctionCall {
                name,
                argument,
                alias,
            } if is_aggregate_function(name) => Some(AggregateSpec {
                function: name.to_ascii_uppercase(),
                argument: argument.clone(),
                alias: alias
                    .clone()
                    .unwrap_or_else(|| format!("{}({})", name.to_ascii_uppercase(), argument)),
            }),
            _ => None,
        })
        .collect();

    let grouped = !aggregates.is_empty() || !select.group_by.is_empty() || select.having.is_some();
    if grouped {
        plan = LogicalPlan::Group {
            group_columns: select.group_by.clone(),
            aggregates,
            having: select.having.as_ref().map(condition_text),
            input: Box::new(plan),
        };
    } else {
        // Plain column projection, unless the list is SELECT *.
        let mut columns = Vec::new();
        let mut has_star = false;
        for item in &select.items {
            match item {
                SelectItem::Star => has_star = true,
                SelectItem::Expression { expr, .. } => match expr {
                    Expr::Column(name) => columns.push(name.clone()),
                    other => {
                        return Err(DbError::InvalidArgument(format!(
                            "unsupported select item: {}",
                            other
                        )));
                    }
                },
                SelectItem::FunctionCall { name, .. } => {
                    return Err(DbError::InvalidArgument(format!(
                        "unknown function: {}",
                        name
                    )));
                }
            }
        }
        if !has_star && !columns.is_empty() {
            plan = LogicalPlan::Project {
                columns,
                input: Box::new(plan),
            };
        }
    }

    if select.distinct {
        plan = LogicalPlan::Distinct {
            input: Box::new(plan),
        };
    }

    if !select.order_by.is_empty() {
        let order_by = select
            .order_by
            .iter()
            .map(|key| {
                format!(
                    "{} {}",
                    key.column,
                    if key.ascending { "ASC" } else { "DESC" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        plan = LogicalPlan::Sort {
            order_by,
            input: Box::new(plan),
        };
    }

    if select.limit.is_some() || select.offset > 0 {
        plan = LogicalPlan::Limit {
            limit: select.limit.unwrap_or(0),
            offset: select.offset,
            input: Box::new(plan),
        };
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::Statement;
    use crate::sql::parser::Parser;

    fn plan_for(sql: &str) -> LogicalPlan {
        match Parser::parse(sql).unwrap() {
            Statement::Select(select) => build_logical_plan(&select).unwrap(),
            other => panic!("expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn where_becomes_select_over_scan() {
        let plan = plan_for("SELECT * FROM users WHERE age > 30");
        match plan {
            LogicalPlan::Select { condition, input } => {
                assert_eq!(condition, "age > 30");
                assert!(matches!(*input, LogicalPlan::Scan { ref table } if table == "users"));
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn comma_from_builds_cross_product() {
        let plan = plan_for("SELECT * FROM a, b WHERE a.x = b.y");
        match plan {
            LogicalPlan::Select { input, .. } => {
                assert!(matches!(*input, LogicalPlan::CrossProduct { .. }));
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn aggregates_build_group_node() {
        let plan = plan_for(
            "SELECT region, COUNT(*) AS cnt FROM sales GROUP BY region HAVING cnt > 2",
        );
        match plan {
            LogicalPlan::Group {
                group_columns,
                aggregates,
                having,
                ..
            } => {
                assert_eq!(group_columns, vec!["region"]);
                assert_eq!(aggregates[0].encode(), "COUNT:*:cnt");
                assert_eq!(having.as_deref(), Some("cnt > 2"));
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn ordering_of_wrappers() {
        let plan = plan_for("SELECT DISTINCT age FROM users ORDER BY age DESC LIMIT 3");
        // Outermost Limit, then Sort, then Distinct, then Project.
        let LogicalPlan::Limit { limit, input, .. } = plan else {
            panic!("expected limit at root");
        };
        assert_eq!(limit, 3);
        let LogicalPlan::Sort { order_by, input } = *input else {
            panic!("expected sort");
        };
        assert_eq!(order_by, "age DESC");
        let LogicalPlan::Distinct { input } = *input else {
            panic!("expected distinct");
        };
        assert!(matches!(*input, LogicalPlan::Project { .. }));
    }

    #[test]
    fn aliases_and_subqueries_become_rename() {
        let plan = plan_for("SELECT * FROM users u");
        assert!(matches!(plan, LogicalPlan::Rename { ref alias, .. } if alias == "u"));
        let plan = plan_for("SELECT * FROM (SELECT * FROM users) snapshot");
        assert!(matches!(plan, LogicalPlan::Rename { ref alias, .. } if alias == "snapshot"));
    }

    #[test]
    fn limit_zero_is_unbounded_offset_only() {
        let plan = plan_for("SELECT * FROM t OFFSET 4");
        match plan {
            LogicalPlan::Limit { limit, offset, .. } => {
                assert_eq!(limit, 0);
                assert_eq!(offset, 4);
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }
}
