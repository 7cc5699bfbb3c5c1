//! Top-level construct parsing: definitions, externals, prototypes, and
//! anonymous wrappers for bare expressions.

use crate::ast::{Function, Item, Prototype};
use crate::ops::{OperatorInfo, DEFAULT_PRECEDENCE, PRECEDENCE_RANGE};
use crate::{ParseError, Parser};
use kalc_lex::Token;

impl<'a> Parser<'a> {
    /// `definition ::= 'def' prototype expression`
    pub(crate) fn parse_definition(&mut self) -> Result<Item, ParseError> {
        self.bump(); // 'def'
        let proto = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Item::Function(Function { proto, body }))
    }

    /// `external ::= 'extern' prototype`
    pub(crate) fn parse_external(&mut self) -> Result<Item, ParseError> {
        self.bump(); // 'extern'
        let proto = self.parse_prototype()?;
        Ok(Item::Prototype(proto))
    }

    /// `toplevelexpr ::= expression`
    ///
    /// Wraps the expression in a uniquely-named zero-argument anonymous
    /// function so the driver can JIT-compile and invoke it.
    pub(crate) fn parse_top_level_expr(&mut self) -> Result<Item, ParseError> {
        let body = self.parse_expression()?;
        let sequence = self.next_anon_sequence();
        Ok(Item::Function(Function::anonymous(body, sequence)))
    }

    /// `prototype ::= identifier '(' identifier* ')'
    ///              | 'binary' OP number? '(' identifier identifier ')'
    ///              | 'unary'  OP '(' identifier ')'`
    fn parse_prototype(&mut self) -> Result<Prototype, ParseError> {
        match &self.cur {
            Token::Identifier(_) => {
                let name = self.expect_identifier()?;
                let params = self.parse_prototype_params()?;
                Ok(Prototype::new(name, params))
            }
            Token::Binary => self.parse_binary_op_prototype(),
            Token::Unary => self.parse_unary_op_prototype(),
            _ => Err(ParseError::ExpectedFunctionName),
        }
    }

    /// Helper for `'(' identifier* ')'`.
    fn parse_prototype_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_op('(')?;

        let mut params = Vec::new();
        while matches!(self.cur, Token::Identifier(_)) {
            params.push(self.expect_identifier()?);
        }
        self.expect_op(')')?;

        Ok(params)
    }

    /// Helper for `'binary' OP number? '(' identifier identifier ')'`.
    ///
    /// Installs the operator into the table before returning, so the
    /// operator is usable in the prototype's own body and in everything
    /// parsed after it.
    fn parse_binary_op_prototype(&mut self) -> Result<Prototype, ParseError> {
        self.bump(); // 'binary'
        let op = match self.cur {
            Token::Operator(c) => c,
            _ => return Err(ParseError::ExpectedOperator("binary")),
        };
        self.bump(); // OP

        // Read the precedence, if present.
        let precedence = match &self.cur {
            Token::Number(text) => {
                let parsed = text
                    .parse::<i32>()
                    .ok()
                    .filter(|p| PRECEDENCE_RANGE.contains(p))
                    .ok_or_else(|| ParseError::BadPrecedence(text.clone()))?;
                self.bump(); // number
                parsed
            }
            _ => DEFAULT_PRECEDENCE,
        };

        // As this is a new binary operator, install it.
        self.ops
            .borrow_mut()
            .install(op, OperatorInfo::left(precedence));

        let params = self.parse_prototype_params()?;
        if params.len() != 2 {
            return Err(ParseError::BinaryOperandCount);
        }

        Ok(Prototype {
            name: format!("binary{}", op),
            params,
            is_operator: true,
            precedence: Some(precedence as u32),
        })
    }

    /// Helper for `'unary' OP '(' identifier ')'`.
    ///
    /// Unary prototypes do not touch the operator table: unary parsing is
    /// keyed on the lexical class alone, and the emitter resolves the
    /// `unary<c>` function by name.
    fn parse_unary_op_prototype(&mut self) -> Result<Prototype, ParseError> {
        self.bump(); // 'unary'
        let op = match self.cur {
            Token::Operator(c) => c,
            _ => return Err(ParseError::ExpectedOperator("unary")),
        };
        self.bump(); // OP

        let params = self.parse_prototype_params()?;
        if params.len() != 1 {
            return Err(ParseError::UnaryOperandCount);
        }

        Ok(Prototype {
            name: format!("unary{}", op),
            params,
            is_operator: true,
            precedence: None,
        })
    }
}
