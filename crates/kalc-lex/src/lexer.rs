//! Core lexer implementation.
//!
//! The lexer transforms Kaleidoscope source text into a stream of tokens.
//! It never fails: characters it does not recognize are emitted as
//! single-character operator tokens and diagnosed by later phases.

use crate::cursor::Cursor;
use crate::token::Token;

/// Lexer for the Kaleidoscope language.
///
/// Tokens are produced lazily, one per [`Lexer::next_token`] call. Rules,
/// applied in order:
///
/// 1. Whitespace is skipped.
/// 2. `#` starts a comment running to the end of the line.
/// 3. `[A-Za-z_][A-Za-z0-9_]*` is an identifier, or a keyword if the
///    lexeme matches one.
/// 4. `[0-9.]+` is a number lexeme, accepted greedily.
/// 5. Any other character becomes a single-character operator token.
/// 6. At end of input a single `Eof` is produced.
pub struct Lexer<'a> {
    /// Character cursor for source traversal.
    cursor: Cursor<'a>,

    /// Whether the trailing `Eof` has been handed out by the iterator.
    done: bool,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
            done: false,
        }
    }

    /// Returns the next token from the source code.
    ///
    /// Skips whitespace and comments, then dispatches on the current
    /// character. Returns `Token::Eof` at (and after) end of input.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        if self.cursor.is_at_end() {
            return Token::Eof;
        }

        let c = self.cursor.current_char();
        if is_ident_start(c) {
            self.lex_identifier()
        } else if is_number_char(c) {
            self.lex_number()
        } else {
            self.cursor.advance();
            Token::Operator(c)
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            let c = self.cursor.current_char();
            if c.is_whitespace() {
                self.cursor.advance();
            } else if c == '#' {
                // Comment until end of line.
                while !self.cursor.is_at_end()
                    && !matches!(self.cursor.current_char(), '\r' | '\n')
                {
                    self.cursor.advance();
                }
            } else {
                break;
            }
        }
    }

    /// Lexes an identifier or keyword: `[A-Za-z_][A-Za-z0-9_]*`.
    fn lex_identifier(&mut self) -> Token {
        let start = self.cursor.position();
        while is_ident_continue(self.cursor.current_char()) {
            self.cursor.advance();
        }
        let text = self.cursor.slice_from(start);
        Token::keyword(text).unwrap_or_else(|| Token::Identifier(text.to_string()))
    }

    /// Lexes a number lexeme: `[0-9.]+`, taken greedily.
    ///
    /// `1.2.3` is a single token; numeric validity is a concern of the
    /// later lexeme-to-double conversion.
    fn lex_number(&mut self) -> Token {
        let start = self.cursor.position();
        while is_number_char(self.cursor.current_char()) {
            self.cursor.advance();
        }
        Token::Number(self.cursor.slice_from(start).to_string())
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    /// Yields every token of the source, including a single trailing
    /// `Eof`, then ends the stream.
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let token = self.next_token();
        if token == Token::Eof {
            self.done = true;
        }
        Some(token)
    }
}
