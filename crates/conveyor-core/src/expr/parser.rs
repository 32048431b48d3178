//! Recursive-descent parser producing an expression tree.
//!
//! Precedence, loosest first: `||`, `&&`, `== !=`, `< <= > >=`, `!`, then
//! member access, indexing and calls.

use super::lexer::{Token, tokenize};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(serde_json::Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(Error::expression(source, "empty expression"));
    }
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let expr = parser.or()?;
    if let Some(token) = parser.peek() {
        return Err(Error::expression(
            source,
            format!("unexpected token {token:?} after expression"),
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    fn error(&self, reason: String) -> Error {
        match self.peek() {
            Some(token) => Error::expression(self.source, format!("{reason}, found {token:?}")),
            None => Error::expression(self.source, format!("{reason}, found end of input")),
        }
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                    // `a.true` style keys still address object fields
                    Some(Token::True) => expr = Expr::Member(Box::new(expr), "true".into()),
                    Some(Token::False) => expr = Expr::Member(Box::new(expr), "false".into()),
                    Some(Token::Null) => expr = Expr::Member(Box::new(expr), "null".into()),
                    _ => {
                        self.pos -= 1;
                        return Err(self.error("expected property name after '.'".into()));
                    }
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.or()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.peek() == Some(&Token::LParen) {
                let Expr::Ident(name) = expr else {
                    return Err(self.error("only named functions can be called".into()));
                };
                self.pos += 1;
                let args = self.arguments()?;
                expr = Expr::Call(name, args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.or()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma)?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(serde_json::Value::String(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::True) => Ok(Expr::Literal(serde_json::Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(serde_json::Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(serde_json::Value::Null)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a value".into()))
            }
        }
    }
}

pub(crate) fn number_value(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::json!(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_comparison() {
        let expr = parse("cds.workflow == 'x'").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Eq, left, right) => {
                assert_eq!(
                    *left,
                    Expr::Member(Box::new(Expr::Ident("cds".into())), "workflow".into())
                );
                assert_eq!(*right, Expr::Literal(serde_json::json!("x")));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("a || b && c").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::Or, _, _)));
    }

    #[test]
    fn test_parse_call_and_index() {
        let expr = parse("contains(matrix['os'], 'lin')").unwrap();
        match expr {
            Expr::Call(name, args) => {
                assert_eq!(name, "contains");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expr::Index(_, _)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
        assert_eq!(parse("always()").unwrap(), Expr::Call("always".into(), vec![]));
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(parse("cds.workflow ==< && 'x'").is_err());
        assert!(parse("a ==").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("'x'(1)").is_err());
        assert!(parse("").is_err());
    }
}
