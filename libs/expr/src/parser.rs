//! Recursive descent parser.
//!
//! Precedence, lowest first:
//!
//! | Level | Operators |
//! |-------|-----------|
//! | or | `\|\|` `or` |
//! | and | `&&` `and` |
//! | comparison | `== != < <= > >= in` `not in` `contains startsWith endsWith` |
//! | additive | `+ -` |
//! | multiplicative | `* / %` |
//! | unary | `! not -` |
//! | postfix | `.field` `[index]` |
//!
//! Comparisons do not chain: `a < b < c` is a syntax error.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ExprError, ExprResult};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::value::Value;

/// Maximum nesting depth accepted by the parser.
pub(crate) const MAX_DEPTH: usize = 64;

pub(crate) fn parse(source: &str) -> ExprResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };

    if parser.peek() == &TokenKind::Eof {
        return Err(ExprError::syntax(0, "expression is empty"));
    }

    let expr = parser.parse_or()?;
    let trailing = parser.current();
    if trailing.kind != TokenKind::Eof {
        return Err(ExprError::syntax(
            trailing.offset,
            format!("unexpected {}", describe(&trailing.kind)),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // tokenize always ends with Eof and we never advance past it
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_second(&self) -> &TokenKind {
        let idx = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ExprResult<Token> {
        if self.peek() == &kind {
            return Ok(self.advance());
        }
        let token = self.current();
        Err(ExprError::syntax(
            token.offset,
            format!("expected {what}, found {}", describe(&token.kind)),
        ))
    }

    fn enter(&mut self) -> ExprResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> ExprResult<Expr> {
        self.enter()?;
        let mut lhs = self.parse_and()?;
        while self.peek() == &TokenKind::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.peek() == &TokenKind::And {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn comparison_op(&self) -> Option<(BinaryOp, usize)> {
        let op = match self.peek() {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::In => BinaryOp::In,
            TokenKind::Contains => BinaryOp::Contains,
            TokenKind::StartsWith => BinaryOp::StartsWith,
            TokenKind::EndsWith => BinaryOp::EndsWith,
            TokenKind::Not if self.peek_second() == &TokenKind::In => {
                return Some((BinaryOp::NotIn, 2))
            }
            _ => return None,
        };
        Some((op, 1))
    }

    fn parse_comparison(&mut self) -> ExprResult<Expr> {
        let lhs = self.parse_additive()?;
        let Some((op, width)) = self.comparison_op() else {
            return Ok(lhs);
        };
        for _ in 0..width {
            self.advance();
        }
        let rhs = self.parse_additive()?;

        if self.comparison_op().is_some() {
            return Err(ExprError::syntax(
                self.current().offset,
                "comparison operators cannot be chained; use 'and'",
            ));
        }
        Ok(binary(op, lhs, rhs))
    }

    fn parse_additive(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        let op = match self.peek() {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> ExprResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let token = self.advance();
                    let TokenKind::Ident(name) = token.kind else {
                        return Err(ExprError::syntax(
                            token.offset,
                            format!("expected field name after '.', found {}", describe(&token.kind)),
                        ));
                    };
                    expr = Expr::Member {
                        target: Box::new(expr),
                        name,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        let token = self.advance();
        let expr = match token.kind {
            TokenKind::Int(i) => Expr::Literal(Value::Int(i)),
            TokenKind::Float(f) => Expr::Literal(Value::Float(f)),
            TokenKind::Str(s) => Expr::Literal(Value::String(s)),
            TokenKind::True => Expr::Literal(Value::Bool(true)),
            TokenKind::False => Expr::Literal(Value::Bool(false)),
            TokenKind::Nil => Expr::Literal(Value::Nil),
            TokenKind::Ident(name) if self.peek() == &TokenKind::LParen => {
                self.advance();
                let args = self.parse_list_items(TokenKind::RParen, "')'")?;
                Expr::Call {
                    function: name,
                    args,
                }
            }
            TokenKind::Ident(name) => Expr::Field(name),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen, "')'")?;
                inner
            }
            TokenKind::LBracket => {
                Expr::List(self.parse_list_items(TokenKind::RBracket, "']'")?)
            }
            other => {
                return Err(ExprError::syntax(
                    token.offset,
                    format!("unexpected {}", describe(&other)),
                ))
            }
        };
        Ok(expr)
    }

    /// Comma separated expressions up to `close`, which is consumed.
    fn parse_list_items(&mut self, close: TokenKind, what: &str) -> ExprResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.peek() == &close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if self.peek() == &TokenKind::Comma {
                self.advance();
                continue;
            }
            self.expect(close.clone(), what)?;
            return Ok(items);
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Int(i) => format!("number {i}"),
        TokenKind::Float(f) => format!("number {f}"),
        TokenKind::Str(s) => format!("string {s:?}"),
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::Eof => "end of expression".to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Box<Expr> {
        Box::new(Expr::Field(name.to_string()))
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("a or b and c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Or,
                lhs: field("a"),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::And,
                    lhs: field("b"),
                    rhs: field("c"),
                }),
            }
        );
    }

    #[test]
    fn test_not_in_and_unary_not() {
        let expr = parse("not a not in b").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::NotIn,
                lhs: Box::new(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: field("a"),
                }),
                rhs: field("b"),
            }
        );
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse("disks[0].name").unwrap();
        assert_eq!(
            expr,
            Expr::Member {
                target: Box::new(Expr::Index {
                    target: field("disks"),
                    index: Box::new(Expr::Literal(Value::Int(0))),
                }),
                name: "name".to_string(),
            }
        );
    }

    #[test]
    fn test_call_with_arguments() {
        let expr = parse("path_dir(location) == '/dc1'").unwrap();
        let Expr::Binary { lhs, .. } = expr else {
            panic!("expected binary expression");
        };
        assert_eq!(
            *lhs,
            Expr::Call {
                function: "path_dir".to_string(),
                args: vec![Expr::Field("location".to_string())],
            }
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").unwrap_err().is_syntax());
        assert!(parse("a ==").unwrap_err().is_syntax());
        assert!(parse("(a").unwrap_err().is_syntax());
        assert!(parse("a b").unwrap_err().is_syntax());
        assert!(parse("1 < 2 < 3").unwrap_err().is_syntax());
        assert!(parse("[1, 2").unwrap_err().is_syntax());
        assert!(parse("a.1").unwrap_err().is_syntax());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}true{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(parse(&deep).unwrap_err(), ExprError::TooDeep(MAX_DEPTH));

        let negations = format!("{}true", "!".repeat(200));
        assert_eq!(parse(&negations).unwrap_err(), ExprError::TooDeep(MAX_DEPTH));
    }
}
