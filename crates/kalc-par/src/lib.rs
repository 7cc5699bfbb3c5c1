//! kalc-par - Parser (Syntactic Analyzer)
//!
//! Recursive-descent parser for Kaleidoscope with Pratt-style precedence
//! climbing for binary operators. The parser owns a single one-token
//! lookahead and produces top-level AST nodes one at a time, on demand.
//!
//! Grammar:
//!
//! ```ebnf
//! toplevel     = ";" | definition | external | toplevelexpr ;
//! definition   = "def" prototype expression ;
//! external     = "extern" prototype ;
//! toplevelexpr = expression ;                    (* anonymous wrapper *)
//! prototype    = identifier "(" { identifier } ")"
//!              | "binary" OP [ number ] "(" identifier identifier ")"
//!              | "unary"  OP "(" identifier ")" ;
//! expression   = unary binoprhs ;
//! binoprhs     = { binop unary } ;               (* precedence climbing *)
//! unary        = primary | unop unary ;
//! primary      = numberexpr | identexpr | parenexpr
//!              | ifexpr | forexpr | varexpr ;
//! ```
//!
//! Binary operators are looked up in the [`OperatorTable`] shared with the
//! evaluator; a `binary<c>` prototype installs `c` into the table *before*
//! its body is parsed, so the new operator is usable immediately,
//! including recursively inside its own definition.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kalc_lex::{Lexer, Token};
use thiserror::Error;

pub mod ast;
pub mod ops;

mod expr;
mod items;

pub use ast::{Expr, Function, Item, Prototype, ANON_FN_PREFIX};
pub use ops::{Associativity, OperatorInfo, OperatorTable, DEFAULT_PRECEDENCE};

/// A syntax error.
///
/// Messages are human-readable and carry no source locations. A parse
/// error abandons the current top-level construct.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected {expected} but found {found}")]
    Expected { expected: String, found: String },

    #[error("unknown token {0} when expecting an expression")]
    ExpectedExpression(String),

    #[error("expected function name in prototype")]
    ExpectedFunctionName,

    #[error("expected operator after '{0}'")]
    ExpectedOperator(&'static str),

    #[error("invalid precedence '{0}' (must be an integer in 1..=100)")]
    BadPrecedence(String),

    #[error("expected binary operator to have two operands")]
    BinaryOperandCount,

    #[error("expected unary operator to have one operand")]
    UnaryOperandCount,

    #[error("expected identifier after 'var'")]
    ExpectedVarName,

    #[error("expected identifier in 'var' after ','")]
    ExpectedVarNameAfterComma,
}

/// Parser for the Kaleidoscope language.
///
/// The operator table and the anonymous-wrapper counter are owned by the
/// evaluator and shared in; the table because user-defined operators must
/// survive across `parse` calls and be reset together with the module,
/// the counter so that every wrapper emitted against one module gets a
/// unique name.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    ops: Rc<RefCell<OperatorTable>>,
    anon_counter: Rc<Cell<u64>>,
}

impl<'a> Parser<'a> {
    /// Creates a parser over `source`, priming the one-token lookahead.
    pub fn new(
        source: &'a str,
        ops: Rc<RefCell<OperatorTable>>,
        anon_counter: Rc<Cell<u64>>,
    ) -> Self {
        let mut lexer = Lexer::new(source);
        let cur = lexer.next_token();
        Self {
            lexer,
            cur,
            ops,
            anon_counter,
        }
    }

    /// Parses the next top-level construct, or returns `None` at end of
    /// input. Bare `;` tokens at the top level are consumed and ignored.
    pub fn parse_top_level(&mut self) -> Result<Option<Item>, ParseError> {
        loop {
            match &self.cur {
                Token::Eof => return Ok(None),
                Token::Operator(';') => {
                    self.bump(); // ignore top-level semicolons
                }
                Token::Def => return self.parse_definition().map(Some),
                Token::Extern => return self.parse_external().map(Some),
                _ => return self.parse_top_level_expr().map(Some),
            }
        }
    }

    /// Advances the lookahead by one token.
    fn bump(&mut self) {
        self.cur = self.lexer.next_token();
    }

    /// Consumes the expected operator character or fails.
    fn expect_op(&mut self, c: char) -> Result<(), ParseError> {
        if self.cur.is_op(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", c)))
        }
    }

    /// Consumes an identifier, returning its name.
    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match std::mem::replace(&mut self.cur, Token::Eof) {
            Token::Identifier(name) => {
                self.cur = self.lexer.next_token();
                Ok(name)
            }
            other => {
                self.cur = other;
                Err(self.expected("identifier"))
            }
        }
    }

    /// Consumes the expected keyword token or fails.
    fn expect_keyword(&mut self, keyword: Token, rendered: &str) -> Result<(), ParseError> {
        if self.cur == keyword {
            self.bump();
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", rendered)))
        }
    }

    fn expected(&self, expected: &str) -> ParseError {
        ParseError::Expected {
            expected: expected.to_string(),
            found: describe(&self.cur),
        }
    }

    /// The precedence of the current token, or −1 for non-operators.
    fn cur_precedence(&self) -> i32 {
        match self.cur {
            Token::Operator(c) => self.ops.borrow().precedence(c),
            _ => -1,
        }
    }

    /// Allocates the next anonymous-wrapper sequence number.
    fn next_anon_sequence(&self) -> u64 {
        let n = self.anon_counter.get();
        self.anon_counter.set(n + 1);
        n
    }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Result<Item, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parse_top_level().transpose()
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Eof => "end of input".to_string(),
        other => format!("'{}'", other),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Parses all top-level constructs of `source` with a fresh operator
    /// table and counter, panicking on error.
    pub fn parse_all(source: &str) -> Vec<Item> {
        let ops = Rc::new(RefCell::new(OperatorTable::new()));
        let anon = Rc::new(Cell::new(0));
        Parser::new(source, ops, anon)
            .collect::<Result<Vec<_>, _>>()
            .expect("source should parse")
    }

    /// Parses the first top-level construct of `source`.
    pub fn parse_one(source: &str) -> Item {
        parse_all(source).remove(0)
    }

    /// Parses the first top-level construct, which must be an anonymous
    /// wrapper, and returns its body.
    pub fn parse_expr(source: &str) -> Expr {
        match parse_one(source) {
            Item::Function(f) if f.is_anonymous() => f.body,
            other => panic!("expected an anonymous wrapper, got {:?}", other),
        }
    }

    /// Parses expecting a failure on the first construct.
    pub fn parse_err(source: &str) -> ParseError {
        let ops = Rc::new(RefCell::new(OperatorTable::new()));
        let anon = Rc::new(Cell::new(0));
        let mut parser = Parser::new(source, ops, anon);
        loop {
            match parser.parse_top_level() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("expected a parse error"),
                Err(err) => return err,
            }
        }
    }
}
