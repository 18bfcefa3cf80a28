//! Recursive-descent parser for the JPQL-like query language.

pub mod ast;
mod lexer;
mod parser;

pub use lexer::{Token, TokenKind, tokenize};
pub use parser::{parse, parse_select};
