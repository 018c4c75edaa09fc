//! Recursive-descent parser for the condition strings carried in plans.
//!
//! Precedence, loosest first: OR, AND, comparisons, additive, multiplicative,
//! unary NOT, primary.

use crate::common::errors::{ExprError, ExprResult};
use crate::expr::{ArithOp, CompareOp, Expr, LogicalOp, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Number(String),
    StringLit(String),
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> ExprResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else if chars.get(i + 1) == Some(&'>') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("stray '!'".into()));
                }
            }
            '\'' | '"' => {
                let quote = ch;
                let mut text = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    text.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExprError::Parse("unterminated string literal".into()));
                }
                i += 1;
                tokens.push(Token::StringLit(text));
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    text.push(chars[i]);
                    i += 1;
                }
                tokens.push(Token::Number(text));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    text.push(chars[i]);
                    i += 1;
                }
                match text.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    _ => tokens.push(Token::Identifier(text)),
                }
            }
            other => {
                return Err(ExprError::Parse(format!("unexpected character '{}'", other)));
            }
        }
    }
    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn consume_if(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_and()?;
        while self.consume_if(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Some(Box::new(right)),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_comparison()?;
        while self.consume_if(&Token::And) {
            let right = self.parse_comparison()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Some(Box::new(right)),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> ExprResult<Expr> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        if self.consume_if(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Logical {
                op: LogicalOp::Not,
                left: Box::new(inner),
                right: None,
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !self.consume_if(&Token::RParen) {
                    return Err(ExprError::Parse("expected ')'".into()));
                }
                Ok(inner)
            }
            Some(Token::Identifier(name)) => Ok(Expr::Column(name)),
            Some(Token::Number(text)) => Ok(Expr::Literal(number_literal(&text)?)),
            Some(Token::StringLit(text)) => Ok(Expr::Literal(Value::string(text))),
            Some(Token::Minus) => match self.advance() {
                Some(Token::Number(text)) => {
                    let value = number_literal(&text)?;
                    Ok(Expr::Literal(Value {
                        kind: value.kind,
                        text: format!("-{}", value.text),
                    }))
                }
                _ => Err(ExprError::Parse("expected number after '-'".into())),
            },
            Some(token) => Err(ExprError::Parse(format!("unexpected token {:?}", token))),
            None => Err(ExprError::Parse("unexpected end of expression".into())),
        }
    }
}

fn number_literal(text: &str) -> ExprResult<Value> {
    if text.contains('.') {
        text.parse::<f64>()
            .map_err(|_| ExprError::Parse(format!("bad number '{}'", text)))?;
        Ok(Value {
            kind: crate::expr::ValueKind::Double,
            text: text.to_string(),
        })
    } else {
        text.parse::<i64>()
            .map_err(|_| ExprError::Parse(format!("bad number '{}'", text)))?;
        Ok(Value {
            kind: crate::expr::ValueKind::Int,
            text: text.to_string(),
        })
    }
}

/// Parses a canonical condition string into an expression tree.
pub fn parse_expression(input: &str) -> ExprResult<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::Parse("empty expression".into()));
    }
    let mut parser = ExprParser {
        tokens,
        position: 0,
    };
    let expr = parser.parse_or()?;
    if parser.peek().is_some() {
        return Err(ExprError::Parse(format!(
            "trailing tokens after expression in '{}'",
            input
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ColumnType;
    use crate::sql::executor::{Schema, Tuple};
    use std::rc::Rc;

    fn tuple(values: &[&str]) -> Tuple {
        let mut schema = Schema::new();
        schema.add_column_info("a", ColumnType::Integer, 0, "t");
        schema.add_column_info("b", ColumnType::Double, 1, "t");
        schema.add_column_info("name", ColumnType::String, 2, "t");
        Tuple::new(
            values.iter().map(|v| v.to_string()).collect(),
            Rc::new(schema),
        )
    }

    fn eval(input: &str, values: &[&str]) -> Value {
        parse_expression(input).unwrap().evaluate(&tuple(values)).unwrap()
    }

    #[test]
    fn precedence_and_arithmetic() {
        assert_eq!(eval("1 + 2 * 3", &["0", "0", ""]).text, "7");
        assert_eq!(eval("(1 + 2) * 3", &["0", "0", ""]).text, "9");
        assert_eq!(eval("10 % 4", &["0", "0", ""]).text, "2");
        assert_eq!(eval("7 / 2", &["0", "0", ""]).text, "3");
        assert_eq!(eval("7.0 / 2", &["0", "0", ""]).text, "3.5");
    }

    #[test]
    fn comparisons_use_typed_values() {
        assert!(eval("a < 10", &["9", "0", ""]).as_bool());
        assert!(!eval("a < 10", &["10", "0", ""]).as_bool());
        // Integer column compared numerically, not lexicographically.
        assert!(eval("a > 9", &["10", "0", ""]).as_bool());
        assert!(eval("name = 'bob'", &["0", "0", "bob"]).as_bool());
        assert!(eval("name <> 'bob'", &["0", "0", "alice"]).as_bool());
        assert!(eval("b >= 2.5", &["0", "2.5", ""]).as_bool());
    }

    #[test]
    fn logicals_short_circuit() {
        assert!(eval("a = 1 AND name = 'x'", &["1", "0", "x"]).as_bool());
        assert!(!eval("a = 1 AND name = 'x'", &["1", "0", "y"]).as_bool());
        assert!(eval("a = 2 OR name = 'x'", &["1", "0", "x"]).as_bool());
        assert!(eval("NOT (a = 2)", &["1", "0", ""]).as_bool());
        // Division by zero on the right of a false AND never evaluates.
        assert!(!eval("a = 2 AND 1 / 0 = 1", &["1", "0", ""]).as_bool());
    }

    #[test]
    fn division_by_zero_is_a_domain_error() {
        let expr = parse_expression("a / 0").unwrap();
        let err = expr.evaluate(&tuple(&["1", "0", ""])).unwrap_err();
        assert!(matches!(err, ExprError::Domain(_)));
        let expr = parse_expression("a % 0").unwrap();
        assert!(expr.evaluate(&tuple(&["1", "0", ""])).is_err());
    }

    #[test]
    fn null_column_values_sort_low_and_are_falsy() {
        assert!(!eval("a = 0", &["NULL", "0", ""]).as_bool());
        assert!(eval("a < 0", &["NULL", "0", ""]).as_bool());
    }

    #[test]
    fn qualified_identifiers_parse() {
        let expr = parse_expression("users.id = 4").unwrap();
        assert_eq!(expr.to_string(), "users.id = 4");
    }

    #[test]
    fn display_round_trips() {
        for input in [
            "a = 1",
            "(a = 1 AND b > 2)",
            "name = 'carol'",
            "a + 1 * b < 10",
            "NOT (a = 2)",
            "((a = 1 OR a = 2) AND b <= 3.5)",
        ] {
            let parsed = parse_expression(input).unwrap();
            let reparsed = parse_expression(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "round-trip of '{}'", input);
        }
    }
}
