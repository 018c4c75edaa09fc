//! Typed values and expression trees.
//!
//! Stored data is canonical text; expressions reify typed values only at
//! evaluation sites. The `Display` impl for `Expr` produces the canonical
//! condition strings carried inside logical and physical plans.

pub mod parser;

use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::common::errors::{ExprError, ExprResult};
use crate::common::ColumnType;
use crate::sql::executor::Tuple;

pub use parser::parse_expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Int,
    Double,
    Str,
    Bool,
}

/// A runtime value: a kind plus its canonical textual form.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub kind: ValueKind,
    pub text: String,
}

impl Value {
    pub fn null() -> Self {
        Self {
            kind: ValueKind::Null,
            text: "NULL".into(),
        }
    }

    pub fn int(value: i64) -> Self {
        Self {
            kind: ValueKind::Int,
            text: value.to_string(),
        }
    }

    pub fn double(value: f64) -> Self {
        Self {
            kind: ValueKind::Double,
            text: value.to_string(),
        }
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Str,
            text: text.into(),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            kind: ValueKind::Bool,
            text: if value { "true" } else { "false" }.into(),
        }
    }

    /// Builds a typed value from a stored column string. The literal "NULL"
    /// is the engine's null marker (outer joins pad with it).
    pub fn from_column(text: &str, column_type: ColumnType) -> Self {
        if text == "NULL" {
            return Self::null();
        }
        let kind = match column_type {
            ColumnType::Integer => ValueKind::Int,
            ColumnType::Double => ValueKind::Double,
            ColumnType::String => ValueKind::Str,
        };
        Self {
            kind,
            text: text.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.kind == ValueKind::Null
    }

    pub fn as_int(&self) -> ExprResult<i64> {
        if self.is_null() {
            return Err(ExprError::Domain("cannot convert NULL to integer".into()));
        }
        self.text
            .trim()
            .parse()
            .or_else(|_| self.as_double_raw().map(|d| d as i64))
            .map_err(|_: ExprError| {
                ExprError::Domain(format!("failed to convert '{}' to integer", self.text))
            })
    }

    fn as_double_raw(&self) -> ExprResult<f64> {
        self.text
            .trim()
            .parse()
            .map_err(|_| ExprError::Domain(format!("failed to convert '{}' to double", self.text)))
    }

    pub fn as_double(&self) -> ExprResult<f64> {
        if self.is_null() {
            return Err(ExprError::Domain("cannot convert NULL to double".into()));
        }
        self.as_double_raw()
    }

    /// Truthiness: non-empty non-null is true, except a boolean "false"/"0".
    pub fn as_bool(&self) -> bool {
        match self.kind {
            ValueKind::Null => false,
            ValueKind::Bool => self.text == "true" || self.text == "1",
            _ => !self.text.is_empty(),
        }
    }

    pub fn as_display(&self) -> &str {
        if self.is_null() {
            "NULL"
        } else {
            &self.text
        }
    }

    fn is_numeric_kind(&self) -> bool {
        matches!(self.kind, ValueKind::Int | ValueKind::Double)
    }

    /// Total order: NULL sorts before every non-null value; two numeric
    /// values compare numerically with a 1e-9 equality tolerance; everything
    /// else compares lexicographically on the textual form.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        if self.is_numeric_kind() && other.is_numeric_kind() {
            if let (Ok(a), Ok(b)) = (self.as_double_raw(), other.as_double_raw()) {
                if (a - b).abs() < 1e-9 {
                    return Ordering::Equal;
                }
                return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            }
        }
        self.text.cmp(&other.text)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn matches(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

/// Expression tree evaluated against tuples.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Option<Box<Expr>>,
    },
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn evaluate(&self, tuple: &Tuple) -> ExprResult<Value> {
        match self {
            Self::Column(name) => {
                let schema = tuple.schema();
                let index = schema
                    .find_column(name)
                    .ok_or_else(|| ExprError::UnknownColumn(name.clone()))?;
                let text = tuple
                    .value(index)
                    .ok_or_else(|| ExprError::Domain(format!("tuple missing column {}", name)))?;
                Ok(Value::from_column(text, schema.column(index).column_type))
            }
            Self::Literal(value) => Ok(value.clone()),
            Self::Compare { op, left, right } => {
                let lhs = left.evaluate(tuple)?;
                let rhs = right.evaluate(tuple)?;
                Ok(Value::boolean(op.matches(lhs.compare(&rhs))))
            }
            Self::Logical { op, left, right } => {
                let lhs = left.evaluate(tuple)?.as_bool();
                let result = match op {
                    LogicalOp::Not => !lhs,
                    // AND/OR short-circuit on the left operand.
                    LogicalOp::And => {
                        if !lhs {
                            false
                        } else {
                            right
                                .as_ref()
                                .ok_or_else(|| ExprError::Parse("AND missing operand".into()))?
                                .evaluate(tuple)?
                                .as_bool()
                        }
                    }
                    LogicalOp::Or => {
                        if lhs {
                            true
                        } else {
                            right
                                .as_ref()
                                .ok_or_else(|| ExprError::Parse("OR missing operand".into()))?
                                .evaluate(tuple)?
                                .as_bool()
                        }
                    }
                };
                Ok(Value::boolean(result))
            }
            Self::Arith { op, left, right } => {
                let lhs = left.evaluate(tuple)?;
                let rhs = right.evaluate(tuple)?;
                let double_math =
                    lhs.kind == ValueKind::Double || rhs.kind == ValueKind::Double;
                if double_math {
                    let a = lhs.as_double()?;
                    let b = rhs.as_double()?;
                    let result = match op {
                        ArithOp::Add => a + b,
                        ArithOp::Sub => a - b,
                        ArithOp::Mul => a * b,
                        ArithOp::Div => {
                            if b.abs() < 1e-9 {
                                return Err(ExprError::Domain("division by zero".into()));
                            }
                            a / b
                        }
                        ArithOp::Mod => {
                            if b.abs() < 1e-9 {
                                return Err(ExprError::Domain("division by zero".into()));
                            }
                            a % b
                        }
                    };
                    Ok(Value::double(result))
                } else {
                    let a = lhs.as_int()?;
                    let b = rhs.as_int()?;
                    let result = match op {
                        ArithOp::Add => a + b,
                        ArithOp::Sub => a - b,
                        ArithOp::Mul => a * b,
                        ArithOp::Div => {
                            if b == 0 {
                                return Err(ExprError::Domain("division by zero".into()));
                            }
                            a / b
                        }
                        ArithOp::Mod => {
                            if b == 0 {
                                return Err(ExprError::Domain("division by zero".into()));
                            }
                            a % b
                        }
                    };
                    Ok(Value::int(result))
                }
            }
        }
    }

    /// Convenience wrapper for predicates.
    pub fn evaluate_bool(&self, tuple: &Tuple) -> ExprResult<bool> {
        Ok(self.evaluate(tuple)?.as_bool())
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Column(name) => f.write_str(name),
            Self::Literal(value) => match value.kind {
                ValueKind::Str => write!(f, "'{}'", value.text),
                _ => f.write_str(value.as_display()),
            },
            Self::Compare { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Self::Logical { op, left, right } => match op {
                LogicalOp::Not => write!(f, "NOT ({})", left),
                LogicalOp::And => {
                    write!(f, "({} AND {})", left, right.as_ref().expect("binary AND"))
                }
                LogicalOp::Or => {
                    write!(f, "({} OR {})", left, right.as_ref().expect("binary OR"))
                }
            },
            Self::Arith { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
        }
    }
}
