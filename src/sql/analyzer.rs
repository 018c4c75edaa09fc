//! Semantic validation.
//!
//! Every named table reference must resolve in the catalog (derived tables
//! are validated recursively). Column references stay permissive; they are
//! resolved later against the execution schema.

use crate::common::errors::{DbError, DbResult};
use crate::schema::DataDictionary;
use crate::sql::ast::{FromElement, SelectStatement, Statement, TableRef};

pub fn analyze(statement: &Statement, dictionary: &DataDictionary) -> DbResult<()> {
    match statement {
        Statement::Select(select) => analyze_select(select, dictionary),
        Statement::Insert(insert) => require_table(&insert.table, dictionary),
        Statement::Update(update) => require_table(&update.table, dictionary),
        Statement::Delete(delete) => require_table(&delete.table, dictionary),
    }
}

fn analyze_select(select: &SelectStatement, dictionary: &DataDictionary) -> DbResult<()> {
    analyze_table_ref(&select.from.first, dictionary)?;
    for element in &select.from.rest {
        match element {
            FromElement::Comma(table) => analyze_table_ref(table, dictionary)?,
            FromElement::Join { table, .. } => analyze_table_ref(table, dictionary)?,
        }
    }
    Ok(())
}

fn analyze_table_ref(table_ref: &TableRef, dictionary: &DataDictionary) -> DbResult<()> {
    match table_ref {
        TableRef::Named { name, .. } => require_table(name, dictionary),
        TableRef::Derived { query, .. } => analyze_select(query, dictionary),
    }
}

fn require_table(name: &str, dictionary: &DataDictionary) -> DbResult<()> {
    if dictionary.has_table(name) {
        Ok(())
    } else {
        Err(DbError::NotFound(format!("unknown table: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ColumnDefinition, ColumnType};
    use crate::schema::TableSchema;
    use crate::sql::parser::Parser;

    fn dictionary() -> DataDictionary {
        let mut dict = DataDictionary::new(1 << 16);
        dict.register_table(
            TableSchema::new(
                "users",
                vec![ColumnDefinition::new("id", ColumnType::Integer, 16)],
            )
            .unwrap(),
        );
        dict
    }

    #[test]
    fn known_tables_pass() {
        let stmt = Parser::parse("SELECT * FROM users").unwrap();
        assert!(analyze(&stmt, &dictionary()).is_ok());
    }

    #[test]
    fn unknown_tables_fail_everywhere() {
        let dict = dictionary();
        for sql in [
            "SELECT * FROM ghosts",
            "SELECT * FROM users JOIN ghosts ON users.id = ghosts.id",
            "SELECT * FROM (SELECT * FROM ghosts) g",
            "INSERT INTO ghosts VALUES (1)",
            "UPDATE ghosts SET x = 1",
            "DELETE FROM ghosts",
        ] {
            let stmt = Parser::parse(sql).unwrap();
            assert!(
                matches!(analyze(&stmt, &dict), Err(DbError::NotFound(_))),
                "{} should fail",
                sql
            );
        }
    }

    #[test]
    fn unknown_columns_are_permitted_here() {
        let stmt = Parser::parse("SELECT no_such_column FROM users").unwrap();
        assert!(analyze(&stmt, &dictionary()).is_ok());
    }
}
