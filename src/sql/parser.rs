//! Recursive-descent statement parser.

use std::mem;

use crate::common::errors::{ParseResult, ParserError};
use crate::common::JoinType;
use crate::expr::{ArithOp, CompareOp, Expr, LogicalOp, Value, ValueKind};
use crate::sql::ast::*;
use crate::sql::lexer::{tokenize, Token};

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(sql: &str) -> ParseResult<Self> {
        Ok(Self {
            tokens: tokenize(sql)?,
            position: 0,
        })
    }

    /// Parses a single statement, tolerating one trailing semicolon.
    pub fn parse(sql: &str) -> ParseResult<Statement> {
        let mut parser = Self::new(sql)?;
        let statement = match parser.peek() {
            Token::Select => Statement::Select(parser.parse_select()?),
            Token::Insert => Statement::Insert(parser.parse_insert()?),
            Token::Update => Statement::Update(parser.parse_update()?),
            Token::Delete => Statement::Delete(parser.parse_delete()?),
            other => {
                return Err(ParserError::InvalidStatement(other.describe()));
            }
        };
        parser.consume_if(&Token::Semicolon);
        parser.expect(Token::Eof)?;
        Ok(statement)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn peek_ahead(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.position + offset)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token != Token::Eof {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if mem::discriminant(self.peek()) == mem::discriminant(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(ParserError::UnexpectedToken(self.peek().describe()))
        }
    }

    fn consume_if(&mut self, token: &Token) -> bool {
        if mem::discriminant(self.peek()) == mem::discriminant(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        match self.advance() {
            Token::Identifier(name) => Ok(name),
            other => Err(ParserError::UnexpectedToken(other.describe())),
        }
    }

    /// `table` or `table.column`.
    fn parse_qualified_identifier(&mut self) -> ParseResult<String> {
        let mut name = self.expect_identifier()?;
        while self.consume_if(&Token::Dot) {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }

    // ---- SELECT ----

    fn parse_select(&mut self) -> ParseResult<SelectStatement> {
        self.expect(Token::Select)?;
        let distinct = if self.consume_if(&Token::Distinct) {
            true
        } else {
            self.consume_if(&Token::All);
            false
        };

        let mut items = vec![self.parse_select_item()?];
        while self.consume_if(&Token::Comma) {
            items.push(self.parse_select_item()?);
        }

        self.expect(Token::From)?;
        let from = self.parse_from_clause()?;

        let where_clause = if self.consume_if(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.consume_if(&Token::Group) {
            self.expect(Token::By)?;
            group_by.push(self.parse_qualified_identifier()?);
            while self.consume_if(&Token::Comma) {
                group_by.push(self.parse_qualified_identifier()?);
            }
        }

        let having = if self.consume_if(&Token::Having) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.consume_if(&Token::Order) {
            self.expect(Token::By)?;
            order_by.push(self.parse_order_key()?);
            while self.consume_if(&Token::Comma) {
                order_by.push(self.parse_order_key()?);
            }
        }

        let mut limit = None;
        let mut offset = 0;
        if self.consume_if(&Token::Limit) {
            limit = Some(self.expect_number_usize()?);
            if self.consume_if(&Token::Offset) {
                offset = self.expect_number_usize()?;
            }
        } else if self.consume_if(&Token::Offset) {
            offset = self.expect_number_usize()?;
        }

        Ok(SelectStatement {
            distinct,
            items,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn expect_number_usize(&mut self) -> ParseResult<usize> {
        match self.advance() {
            Token::NumberLiteral(text) => text
                .parse()
                .map_err(|_| ParserError::UnexpectedToken(format!("number '{}'", text))),
            other => Err(ParserError::UnexpectedToken(other.describe())),
        }
    }

    fn parse_order_key(&mut self) -> ParseResult<OrderKey> {
        let column = self.parse_qualified_identifier()?;
        let mut ascending = true;
        if let Token::Identifier(word) = self.peek() {
            match word.to_ascii_uppercase().as_str() {
                "ASC" => {
                    self.advance();
                }
                "DESC" => {
                    ascending = false;
                    self.advance();
                }
                _ => {}
            }
        }
        Ok(OrderKey { column, ascending })
    }

    fn parse_select_item(&mut self) -> ParseResult<SelectItem> {
        if self.consume_if(&Token::Star) {
            return Ok(SelectItem::Star);
        }
        // Function call: identifier immediately followed by '('.
        if let (Token::Identifier(name), Token::LParen) = (self.peek(), self.peek_ahead(1)) {
            let name = name.clone();
            self.advance();
            self.advance();
            let argument = if self.consume_if(&Token::Star) {
                "*".to_string()
            } else {
                self.parse_expr()?.to_string()
            };
            self.expect(Token::RParen)?;
            let alias = self.parse_optional_alias()?;
            return Ok(SelectItem::FunctionCall {
                name,
                argument,
                alias,
            });
        }
        let expr = self.parse_expr()?;
        let alias = self.parse_optional_alias()?;
        Ok(SelectItem::Expression { expr, alias })
    }

    fn parse_optional_alias(&mut self) -> ParseResult<Option<String>> {
        if self.consume_if(&Token::As) {
            return Ok(Some(self.expect_identifier()?));
        }
        // A bare identifier right after an item is an implicit alias.
        if let Token::Identifier(word) = self.peek() {
            if !matches!(
                word.to_ascii_uppercase().as_str(),
                "ASC" | "DESC"
            ) {
                let alias = word.clone();
                self.advance();
                return Ok(Some(alias));
            }
        }
        Ok(None)
    }

    // ---- FROM ----

    fn parse_from_clause(&mut self) -> ParseResult<FromClause> {
        let first = self.parse_table_ref()?;
        let mut rest = Vec::new();
        loop {
            if self.consume_if(&Token::Comma) {
                rest.push(FromElement::Comma(self.parse_table_ref()?));
                continue;
            }
            let join_type = match self.peek() {
                Token::Join => {
                    self.advance();
                    JoinType::Inner
                }
                Token::Inner => {
                    self.advance();
                    self.expect(Token::Join)?;
                    JoinType::Inner
                }
                Token::Left => {
                    self.advance();
                    self.expect(Token::Join)?;
                    JoinType::Left
                }
                Token::Right => {
                    self.advance();
                    self.expect(Token::Join)?;
                    JoinType::Right
                }
                _ => break,
            };
            let table = self.parse_table_ref()?;
            let on = if self.consume_if(&Token::On) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            rest.push(FromElement::Join {
                join_type,
                table,
                on,
            });
        }
        Ok(FromClause { first, rest })
    }

    fn parse_table_ref(&mut self) -> ParseResult<TableRef> {
        if self.consume_if(&Token::LParen) {
            let query = self.parse_select()?;
            self.expect(Token::RParen)?;
            self.consume_if(&Token::As);
            let alias = self.expect_identifier()?;
            return Ok(TableRef::Derived {
                query: Box::new(query),
                alias,
            });
        }
        let name = self.expect_identifier()?;
        let alias = self.parse_optional_alias()?;
        Ok(TableRef::Named { name, alias })
    }

    // ---- DML ----

    fn parse_insert(&mut self) -> ParseResult<InsertStatement> {
        self.expect(Token::Insert)?;
        self.expect(Token::Into)?;
        let table = self.expect_identifier()?;
        self.expect(Token::Values)?;
        self.expect(Token::LParen)?;
        let mut values = vec![self.parse_expr()?];
        while self.consume_if(&Token::Comma) {
            values.push(self.parse_expr()?);
        }
        self.expect(Token::RParen)?;
        Ok(InsertStatement { table, values })
    }

    fn parse_update(&mut self) -> ParseResult<UpdateStatement> {
        self.expect(Token::Update)?;
        let table = self.expect_identifier()?;
        self.expect(Token::Set)?;
        let mut assignments = Vec::new();
        loop {
            let column = self.parse_qualified_identifier()?;
            self.expect(Token::Eq)?;
            assignments.push((column, self.parse_expr()?));
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }
        let where_clause = if self.consume_if(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(UpdateStatement {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> ParseResult<DeleteStatement> {
        self.expect(Token::Delete)?;
        self.expect(Token::From)?;
        let table = self.expect_identifier()?;
        let where_clause = if self.consume_if(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(DeleteStatement {
            table,
            where_clause,
        })
    }

    // ---- expressions over SQL tokens ----
    // Same precedence ladder as the standalone expression parser:
    // OR < AND < comparisons < additive < multiplicative < NOT < primary.

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and_expr()?;
        while self.consume_if(&Token::Or) {
            let right = self.parse_and_expr()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Some(Box::new(right)),
            };
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_comparison_expr()?;
        while self.consume_if(&Token::And) {
            let right = self.parse_comparison_expr()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Some(Box::new(right)),
            };
        }
        Ok(left)
    }

    fn parse_comparison_expr(&mut self) -> ParseResult<Expr> {
        let left = self.parse_additive_expr()?;
        let op = match self.peek() {
            Token::Eq => Some(CompareOp::Eq),
            Token::Ne => Some(CompareOp::Ne),
            Token::Lt => Some(CompareOp::Lt),
            Token::Le => Some(CompareOp::Le),
            Token::Gt => Some(CompareOp::Gt),
            Token::Ge => Some(CompareOp::Ge),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_additive_expr()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative_expr()?;
        loop {
            let op = match self.peek() {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative_expr()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek() {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                Token::Percent => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary_expr()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> ParseResult<Expr> {
        if self.consume_if(&Token::Not) {
            let inner = self.parse_unary_expr()?;
            return Ok(Expr::Logical {
                op: LogicalOp::Not,
                left: Box::new(inner),
                right: None,
            });
        }
        self.parse_primary_expr()
    }

    fn parse_primary_expr(&mut self) -> ParseResult<Expr> {
        match self.advance() {
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Identifier(first) => {
                let mut name = first;
                while self.consume_if(&Token::Dot) {
                    name.push('.');
                    name.push_str(&self.expect_identifier()?);
                }
                Ok(Expr::Column(name))
            }
            Token::NumberLiteral(text) => Ok(Expr::Literal(number_value(&text)?)),
            Token::StringLiteral(text) => Ok(Expr::Literal(Value::string(text))),
            Token::Minus => match self.advance() {
                Token::NumberLiteral(text) => {
                    let value = number_value(&text)?;
                    Ok(Expr::Literal(Value {
                        kind: value.kind,
                        text: format!("-{}", value.text),
                    }))
                }
                other => Err(ParserError::UnexpectedToken(other.describe())),
            },
            other => Err(ParserError::UnexpectedToken(other.describe())),
        }
    }
}

fn number_value(text: &str) -> ParseResult<Value> {
    let kind = if text.contains('.') {
        text.parse::<f64>()
            .map_err(|_| ParserError::UnexpectedToken(format!("number '{}'", text)))?;
        ValueKind::Double
    } else {
        text.parse::<i64>()
            .map_err(|_| ParserError::UnexpectedToken(format!("number '{}'", text)))?;
        ValueKind::Int
    };
    Ok(Value {
        kind,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_select(sql: &str) -> SelectStatement {
        match Parser::parse(sql).unwrap() {
            Statement::Select(select) => select,
            other => panic!("expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn simple_select() {
        let select = parse_select("SELECT * FROM users");
        assert_eq!(select.items, vec![SelectItem::Star]);
        assert!(!select.distinct);
        assert!(matches!(
            select.from.first,
            TableRef::Named { ref name, alias: None } if name == "users"
        ));
    }

    #[test]
    fn distinct_order_limit_offset() {
        let select =
            parse_select("SELECT DISTINCT age FROM users ORDER BY age DESC, name LIMIT 5 OFFSET 2");
        assert!(select.distinct);
        assert_eq!(select.order_by.len(), 2);
        assert!(!select.order_by[0].ascending);
        assert!(select.order_by[1].ascending);
        assert_eq!(select.limit, Some(5));
        assert_eq!(select.offset, 2);
    }

    #[test]
    fn offset_without_limit() {
        let select = parse_select("SELECT * FROM t OFFSET 3");
        assert_eq!(select.limit, None);
        assert_eq!(select.offset, 3);
    }

    #[test]
    fn joins_with_on() {
        let select = parse_select(
            "SELECT users.name, orders.amount FROM users JOIN orders ON users.id = orders.user_id",
        );
        assert_eq!(select.rest_join_types(), vec![JoinType::Inner]);
        let select = parse_select("SELECT * FROM a LEFT JOIN b ON a.x = b.y RIGHT JOIN c ON c.z = a.x");
        assert_eq!(
            select.rest_join_types(),
            vec![JoinType::Left, JoinType::Right]
        );
    }

    #[test]
    fn comma_from_is_cross_product() {
        let select = parse_select("SELECT * FROM a, b WHERE a.x = b.y");
        assert_eq!(select.from.rest.len(), 1);
        assert!(matches!(select.from.rest[0], FromElement::Comma(_)));
        assert!(select.where_clause.is_some());
    }

    #[test]
    fn group_by_having_and_aggregates() {
        let select = parse_select(
            "SELECT region, COUNT(*) AS cnt, SUM(amount) AS total FROM sales GROUP BY region HAVING cnt > 2",
        );
        assert_eq!(select.group_by, vec!["region"]);
        assert_eq!(select.having.as_ref().unwrap().to_string(), "cnt > 2");
        assert_eq!(
            select.items[1],
            SelectItem::FunctionCall {
                name: "COUNT".into(),
                argument: "*".into(),
                alias: Some("cnt".into()),
            }
        );
        assert_eq!(
            select.items[2],
            SelectItem::FunctionCall {
                name: "SUM".into(),
                argument: "amount".into(),
                alias: Some("total".into()),
            }
        );
    }

    #[test]
    fn table_aliases_and_subqueries() {
        let select = parse_select("SELECT u.name FROM users AS u");
        assert!(matches!(
            select.from.first,
            TableRef::Named { ref alias, .. } if alias.as_deref() == Some("u")
        ));
        let select = parse_select("SELECT * FROM (SELECT id FROM users) latest");
        assert!(matches!(
            select.from.first,
            TableRef::Derived { ref alias, .. } if alias == "latest"
        ));
    }

    #[test]
    fn dml_statements() {
        let stmt = Parser::parse("INSERT INTO users VALUES (1, 'Alice', 30)").unwrap();
        match stmt {
            Statement::Insert(insert) => {
                assert_eq!(insert.table, "users");
                assert_eq!(insert.values.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        let stmt = Parser::parse("UPDATE users SET age = age + 1, name = 'Bobby' WHERE id = 2")
            .unwrap();
        match stmt {
            Statement::Update(update) => {
                assert_eq!(update.assignments.len(), 2);
                assert_eq!(update.assignments[0].1.to_string(), "age + 1");
                assert!(update.where_clause.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        let stmt = Parser::parse("DELETE FROM users WHERE id = 1;").unwrap();
        assert!(matches!(stmt, Statement::Delete(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Parser::parse("SELEC * FROM t").is_err());
        assert!(Parser::parse("SELECT FROM t").is_err());
        assert!(Parser::parse("SELECT * FROM t WHERE").is_err());
    }

    impl SelectStatement {
        fn rest_join_types(&self) -> Vec<JoinType> {
            self.from
                .rest
                .iter()
                .filter_map(|e| match e {
                    FromElement::Join { join_type, .. } => Some(*join_type),
                    FromElement::Comma(_) => None,
                })
                .collect()
        }
    }
}
