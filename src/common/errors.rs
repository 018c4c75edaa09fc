//! Error types for the engine, layered by pipeline stage.
//!
//! `ParserError` covers SQL lexing and parsing, `ExprError` covers expression
//! parsing and evaluation, and `DbError` is the engine-wide taxonomy that
//! everything converts into at the statement boundary.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Error as IoError;

/// SQL text to AST failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserError {
    UnexpectedToken(String),
    UnexpectedEof,
    InvalidStatement(String),
}

impl Display for ParserError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnexpectedToken(s) => write!(f, "Unexpected token: {}", s),
            Self::UnexpectedEof => write!(f, "Unexpected end of input"),
            Self::InvalidStatement(s) => write!(f, "Invalid statement: {}", s),
        }
    }
}

impl Error for ParserError {}

pub type ParseResult<T> = Result<T, ParserError>;

/// Expression parse and evaluation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    Parse(String),
    UnknownColumn(String),
    Domain(String),
    MissingSchema,
}

impl Display for ExprError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Parse(s) => write!(f, "Invalid expression: {}", s),
            Self::UnknownColumn(c) => write!(f, "Column not found: {}", c),
            Self::Domain(s) => write!(f, "{}", s),
            Self::MissingSchema => write!(f, "Tuple has no schema"),
        }
    }
}

impl Error for ExprError {}

pub type ExprResult<T> = Result<T, ExprError>;

/// The engine-wide error taxonomy.
#[derive(Debug)]
pub enum DbError {
    /// Bad configuration or malformed input (arity mismatch, empty schema).
    InvalidArgument(String),
    /// Unknown table, index or column.
    NotFound(String),
    /// Duplicate key on a unique index.
    Conflict(String),
    /// Disk full, record exceeds page size, zero-capacity buffer pool.
    CapacityExceeded(String),
    /// Bad magic, header mismatch, malformed persisted payload.
    Corrupted(String),
    /// Division or modulo by zero, conversions on NULL.
    Domain(String),
    /// Contract violations: next before init, slot out of range.
    Logic(String),
    /// SQL front-end failures surfaced at the statement boundary.
    Parser(ParserError),
    Io(IoError),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::InvalidArgument(s) => write!(f, "Invalid argument: {}", s),
            Self::NotFound(s) => write!(f, "Not found: {}", s),
            Self::Conflict(s) => write!(f, "Conflict: {}", s),
            Self::CapacityExceeded(s) => write!(f, "Capacity exceeded: {}", s),
            Self::Corrupted(s) => write!(f, "Corrupted: {}", s),
            Self::Domain(s) => write!(f, "Domain error: {}", s),
            Self::Logic(s) => write!(f, "Logic error: {}", s),
            Self::Parser(e) => write!(f, "{}", e),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parser(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for DbError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl From<ParserError> for DbError {
    fn from(value: ParserError) -> Self {
        Self::Parser(value)
    }
}

impl From<ExprError> for DbError {
    fn from(value: ExprError) -> Self {
        match value {
            ExprError::Domain(s) => Self::Domain(s),
            ExprError::UnknownColumn(c) => Self::NotFound(format!("column {}", c)),
            ExprError::MissingSchema => Self::Logic("tuple has no schema".into()),
            ExprError::Parse(s) => Self::InvalidArgument(format!("expression: {}", s)),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expr_errors_map_into_the_taxonomy() {
        let e: DbError = ExprError::Domain("division by zero".into()).into();
        assert!(matches!(e, DbError::Domain(_)));
        let e: DbError = ExprError::UnknownColumn("age".into()).into();
        assert!(matches!(e, DbError::NotFound(_)));
    }

    #[test]
    fn display_is_prefixed_by_category() {
        let e = DbError::Conflict("duplicate key 'x'".into());
        assert_eq!(e.to_string(), "Conflict: duplicate key 'x'");
    }
}
