//! Expression language for step predicates and parameters.

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::{Resolver, Value};
pub use lexer::{LexError, Lexer, Token};
pub use parser::{BinaryOp, Expr, Function, ParseError, Reference, Scope};
