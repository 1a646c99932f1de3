//! Recursive-descent parser producing an expression tree.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | compare
//! compare := primary (('==' | '!=') primary)?
//! primary := literal | reference | call | '(' or ')'
//! ```

use crate::expression::lexer::{LexError, Lexer, Spanned, Token};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    String(String),
    Reference(Reference),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
}

/// Where a reference is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Resolved job fields (`job.x`, or `matrix.x`).
    Job,
    /// Host facts (`host.x`).
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub scope: Scope,
    pub name: String,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Job => write!(f, "job.{}", self.name),
            Scope::Host => write!(f, "host.{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `join(separator, part, ...)`, skipping empty parts.
    Join,
    Contains,
    StartsWith,
    EndsWith,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "join" => Some(Function::Join),
            "contains" => Some(Function::Contains),
            "startsWith" => Some(Function::StartsWith),
            "endsWith" => Some(Function::EndsWith),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Join => "join",
            Function::Contains => "contains",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
        }
    }

    fn accepts(&self, arity: usize) -> bool {
        match self {
            Function::Join => arity >= 1,
            Function::Contains | Function::StartsWith | Function::EndsWith => arity == 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            position: err.position,
        }
    }
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr, ParseError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = ExprParser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            Token::Eof => Ok(expr),
            other => Err(parser.error(format!("unexpected {}", other))),
        }
    }

    /// Every reference in the tree, in source order.
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            Expr::Bool(_) | Expr::String(_) => {}
            Expr::Reference(r) => refs.push(r),
            Expr::Not(inner) => inner.collect_references(refs),
            Expr::Binary { left, right, .. } => {
                left.collect_references(refs);
                right.collect_references(refs);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(refs);
                }
            }
        }
    }
}

/// Deepest allowed nesting of `!`, parentheses and call arguments.
const MAX_DEPTH: usize = 64;

struct ExprParser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl ExprParser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].position
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", expected, self.peek())))
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.position(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!(
                "expression nests deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        let expr = if self.eat(&Token::Not) {
            self.parse_unary().map(|inner| Expr::Not(Box::new(inner)))
        } else {
            self.parse_compare()
        };
        self.depth -= 1;
        expr
    }

    fn parse_compare(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_primary()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.position();
        match self.advance() {
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::String(s) => Ok(Expr::String(s)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Identifier(name) => {
                if self.eat(&Token::LParen) {
                    self.parse_call(name, position)
                } else {
                    self.parse_reference(name, position)
                }
            }
            other => Err(ParseError {
                message: format!("unexpected {}", other),
                position,
            }),
        }
    }

    fn parse_reference(&mut self, root: String, position: usize) -> Result<Expr, ParseError> {
        let scope = match root.as_str() {
            "job" | "matrix" => Scope::Job,
            "host" => Scope::Host,
            _ => {
                return Err(ParseError {
                    message: format!(
                        "unknown name '{}', expected job.<field> or host.<fact>",
                        root
                    ),
                    position,
                });
            }
        };
        self.expect(Token::Dot)?;
        match self.advance() {
            Token::Identifier(name) => Ok(Expr::Reference(Reference { scope, name })),
            // `job.true` is a field name, not a literal.
            Token::True => Ok(Expr::Reference(Reference {
                scope,
                name: "true".to_string(),
            })),
            Token::False => Ok(Expr::Reference(Reference {
                scope,
                name: "false".to_string(),
            })),
            other => Err(self.error(format!("expected a field name after '.', found {}", other))),
        }
    }

    fn parse_call(&mut self, name: String, position: usize) -> Result<Expr, ParseError> {
        let function = Function::from_name(&name).ok_or_else(|| ParseError {
            message: format!("unknown function '{}'", name),
            position,
        })?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen)?;
                break;
            }
        }

        if !function.accepts(args.len()) {
            return Err(ParseError {
                message: format!(
                    "function '{}' does not take {} argument(s)",
                    function.name(),
                    args.len()
                ),
                position,
            });
        }
        Ok(Expr::Call { function, args })
    }
}
