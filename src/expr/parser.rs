//! Recursive-descent parser, Python precedence:
//! `or` < `and` < `not` < comparisons/`in` < `+ -` < `* / // %` < unary `- +` < `**`.
//!
//! The only callable/attribute form is `math.<name>` from the allow-list;
//! everything else that looks like a call or attribute access is rejected.

use super::ast::{math_constant, ArithOp, CompareOp, Expr, LogicalOp, MathFn, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::EvalError;
use crate::value::Value;

pub const MAX_EXPR_CHARS: usize = 4096;
/// Bounds AST depth, counting both parentheses and left-nested operator chains.
pub const MAX_DEPTH: usize = 64;

pub fn parse(src: &str) -> Result<Expr, EvalError> {
    if src.chars().count() > MAX_EXPR_CHARS {
        return Err(EvalError::TooLong(MAX_EXPR_CHARS));
    }
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(EvalError::Parse {
            pos: 0,
            message: "empty expression".into(),
        });
    }
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = p.parse_or()?;
    if let Some(extra) = p.peek_spanned() {
        return Err(EvalError::Parse {
            pos: extra.pos,
            message: format!("unexpected trailing token {:?}", extra.token),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn here(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.pos)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|s| s.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: Token, what: &str) -> Result<(), EvalError> {
        if self.eat(&want) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: String) -> EvalError {
        EvalError::Parse {
            pos: self.here(),
            message,
        }
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let mark = self.depth;
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.enter()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Logical {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = mark;
        self.leave();
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            self.enter()?;
            let rhs = self.parse_not()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let operand = self.parse_not()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek()? {
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            Token::EqEq => CompareOp::Eq,
            Token::NotEq => CompareOp::Ne,
            Token::In => CompareOp::In,
            Token::Not if self.peek_at(1) == Some(&Token::In) => {
                self.pos += 2;
                return Some(CompareOp::NotIn);
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_multiplicative()?;
            lhs = arith(op, lhs, rhs);
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::DoubleSlash) => ArithOp::FloorDiv,
                Some(Token::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_unary()?;
            lhs = arith(op, lhs, rhs);
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> Result<Expr, EvalError> {
        let base = self.parse_primary()?;
        if self.eat(&Token::DoubleStar) {
            // right-associative; the exponent may carry its own sign
            self.enter()?;
            let exp = self.parse_unary()?;
            self.leave();
            return Ok(arith(ArithOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let at = self.here();
        let Some(tok) = self.next() else {
            return Err(EvalError::Parse {
                pos: at,
                message: "unexpected end of expression".into(),
            });
        };

        match tok {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::None => Ok(Expr::Literal(Value::Null)),
            Token::Threshold(name) => Ok(Expr::Threshold(name)),
            Token::Ident(name) if name == "math" => self.parse_math(),
            Token::Ident(name) => {
                match self.peek() {
                    Some(Token::LParen) => {
                        return Err(self.error(format!("call to `{name}` is not allowed")))
                    }
                    Some(Token::Dot) => {
                        return Err(self.error(format!("attribute access on `{name}` is not allowed")))
                    }
                    _ => {}
                }
                Ok(Expr::Field(name))
            }
            Token::LParen => {
                if self.eat(&Token::RParen) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_or()?;
                if self.eat(&Token::RParen) {
                    return Ok(first);
                }
                // tuple literal, treated as a list
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.peek() == Some(&Token::RParen) {
                        break;
                    }
                    items.push(self.parse_or()?);
                }
                self.expect(Token::RParen, "`)`")?;
                Ok(Expr::List(items))
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_or()?);
                    if !self.eat(&Token::Comma) || self.peek() == Some(&Token::RBracket) {
                        break;
                    }
                }
                self.expect(Token::RBracket, "`]`")?;
                Ok(Expr::List(items))
            }
            other => Err(EvalError::Parse {
                pos: at,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }

    /// `math.<const>` or `math.<fn>(args...)`
    fn parse_math(&mut self) -> Result<Expr, EvalError> {
        self.expect(Token::Dot, "`.` after `math`")?;
        let name = match self.next() {
            Some(Token::Ident(n)) => n,
            _ => return Err(self.error("expected a name after `math.`".into())),
        };

        if !self.eat(&Token::LParen) {
            return math_constant(&name)
                .map(|v| Expr::Literal(Value::Float(v)))
                .ok_or_else(|| EvalError::UnknownFunction(format!("math.{name}")));
        }

        let func = MathFn::from_name(&name)
            .ok_or_else(|| EvalError::UnknownFunction(format!("math.{name}")))?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "`)`")?;
        }
        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(EvalError::Arity {
                func: func.name(),
                got: args.len(),
            });
        }
        Ok(Expr::Call { func, args })
    }
}

fn arith(op: ArithOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Arith {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
