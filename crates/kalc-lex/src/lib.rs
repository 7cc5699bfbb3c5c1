//! kalc-lex - Lexical Analyzer
//!
//! Turns Kaleidoscope source text into a lazy stream of tokens. The lexer
//! never fails: unknown characters become single-character operator tokens
//! and are diagnosed by the parser or the IR emitter.

pub mod cursor;
pub mod lexer;
pub mod token;

pub use cursor::Cursor;
pub use lexer::Lexer;
pub use token::Token;
