//! Expression parsing.
//!
//! Expressions are parsed as `unary binoprhs`, with a precedence-climbing
//! loop folding binary operators. The minimum-precedence threshold makes
//! left association the default; right-associative operators (only `=` by
//! default) recurse at equal precedence so that `x = y = z` parses as
//! `x = (y = z)`.

use crate::ast::Expr;
use crate::{ParseError, Parser};
use kalc_lex::Token;

impl<'a> Parser<'a> {
    /// `expression ::= unary binoprhs`
    pub(crate) fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_unary()?;
        // Start with minimum precedence 0 so any operator binds here.
        self.parse_bin_op_rhs(0, lhs)
    }

    /// `binoprhs ::= (binop unary)*`
    ///
    /// `min_prec` is the minimum operator precedence this call is allowed
    /// to consume. Non-operator tokens report precedence −1 and terminate
    /// the climb.
    fn parse_bin_op_rhs(&mut self, min_prec: i32, mut lhs: Expr) -> Result<Expr, ParseError> {
        loop {
            let cur_prec = self.cur_precedence();
            if cur_prec < min_prec {
                return Ok(lhs);
            }

            let op = match self.cur {
                Token::Operator(c) => c,
                // cur_precedence() >= 0 only happens for operator tokens
                _ => return Ok(lhs),
            };
            self.bump(); // binop
            let mut rhs = self.parse_unary()?;

            // If the operator after the RHS binds tighter, let it take the
            // RHS as its LHS first. A right-associative operator also
            // reclaims the RHS at equal precedence.
            let next_prec = self.cur_precedence();
            let right_assoc = self.ops.borrow().is_right_associative(op);
            if cur_prec < next_prec || (right_assoc && cur_prec == next_prec) {
                let threshold = if right_assoc { cur_prec } else { cur_prec + 1 };
                rhs = self.parse_bin_op_rhs(threshold, rhs)?;
            }

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    /// `unary ::= primary | unop unary`
    ///
    /// Any operator token other than `(` and `,` may begin a unary
    /// expression; whether a matching `unary<c>` function exists is a
    /// question for the emitter.
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.cur {
            Token::Operator(c) if c != '(' && c != ',' => c,
            _ => return self.parse_primary(),
        };
        self.bump(); // unop
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// `primary ::= identexpr | numberexpr | parenexpr | ifexpr | forexpr
    /// | varexpr`
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match &self.cur {
            Token::Identifier(_) => self.parse_identifier_expr(),
            Token::Number(_) => self.parse_number_expr(),
            Token::Operator('(') => self.parse_paren_expr(),
            Token::If => self.parse_if_expr(),
            Token::For => self.parse_for_expr(),
            Token::Var => self.parse_var_expr(),
            other => Err(ParseError::ExpectedExpression(format!("'{}'", other))),
        }
    }

    /// `numberexpr ::= number`
    fn parse_number_expr(&mut self) -> Result<Expr, ParseError> {
        let text = match &self.cur {
            Token::Number(text) => text.clone(),
            _ => return Err(self.expected("number")),
        };
        self.bump(); // number
        Ok(Expr::Number(text))
    }

    /// `parenexpr ::= '(' expression ')'`
    fn parse_paren_expr(&mut self) -> Result<Expr, ParseError> {
        self.bump(); // '('
        let expr = self.parse_expression()?;
        self.expect_op(')')?;
        Ok(expr)
    }

    /// `identexpr ::= identifier | identifier '(' (expression (','
    /// expression)*)? ')'`
    fn parse_identifier_expr(&mut self) -> Result<Expr, ParseError> {
        let name = self.expect_identifier()?;

        // Simple variable reference.
        if !self.cur.is_op('(') {
            return Ok(Expr::Variable(name));
        }

        // Function call.
        self.bump(); // '('
        let mut args = Vec::new();
        if !self.cur.is_op(')') {
            loop {
                args.push(self.parse_expression()?);
                if self.cur.is_op(')') {
                    break;
                }
                self.expect_op(',')?;
            }
        }
        self.bump(); // ')'
        Ok(Expr::Call { callee: name, args })
    }

    /// `ifexpr ::= 'if' expression 'then' expression 'else' expression`
    fn parse_if_expr(&mut self) -> Result<Expr, ParseError> {
        self.bump(); // 'if'
        let cond = self.parse_expression()?;

        self.expect_keyword(Token::Then, "then")?;
        let then = self.parse_expression()?;

        self.expect_keyword(Token::Else, "else")?;
        let orelse = self.parse_expression()?;

        Ok(Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse: Box::new(orelse),
        })
    }

    /// `forexpr ::= 'for' identifier '=' expression ',' expression (','
    /// expression)? 'in' expression`
    fn parse_for_expr(&mut self) -> Result<Expr, ParseError> {
        self.bump(); // 'for'

        let var = self.expect_identifier()?;
        self.expect_op('=')?;
        let init = self.parse_expression()?;

        self.expect_op(',')?;
        let cond = self.parse_expression()?;

        // The step value is optional.
        let step = if self.cur.is_op(',') {
            self.bump(); // ','
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        self.expect_keyword(Token::In, "in")?;
        let body = self.parse_expression()?;

        Ok(Expr::For {
            var,
            init: Box::new(init),
            cond: Box::new(cond),
            step,
            body: Box::new(body),
        })
    }

    /// `varexpr ::= 'var' identifier ('=' expression)? (',' identifier
    /// ('=' expression)?)* 'in' expression`
    fn parse_var_expr(&mut self) -> Result<Expr, ParseError> {
        self.bump(); // 'var'

        // At least one variable name is required.
        if !matches!(self.cur, Token::Identifier(_)) {
            return Err(ParseError::ExpectedVarName);
        }

        let mut bindings = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let init = if self.cur.is_op('=') {
                self.bump(); // '='
                Some(self.parse_expression()?)
            } else {
                None
            };
            bindings.push((name, init));

            // If there are no more bindings, we're done.
            if !self.cur.is_op(',') {
                break;
            }
            self.bump(); // ','
            if !matches!(self.cur, Token::Identifier(_)) {
                return Err(ParseError::ExpectedVarNameAfterComma);
            }
        }

        self.expect_keyword(Token::In, "in")?;
        let body = self.parse_expression()?;

        Ok(Expr::VarIn {
            bindings,
            body: Box::new(body),
        })
    }

}
