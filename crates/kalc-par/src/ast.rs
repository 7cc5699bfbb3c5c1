//! kalc-par - AST Node Definitions
//!
//! Tagged node types for Kaleidoscope expressions, prototypes, and
//! functions. Every value in the language is a double, so the nodes carry
//! no type information; number literals keep their raw lexeme and are
//! converted when IR is emitted for them.
//!
//! All nodes implement `Display`, rendering back to parseable source text.
//! Expression forms that span multiple tokens print parenthesized, so
//! re-parsing the rendered text reproduces the same tree (anonymous
//! wrappers aside, which get a fresh sequence number).

use std::fmt;

/// Prefix of the synthesized names given to anonymous top-level wrappers.
pub const ANON_FN_PREFIX: &str = "_anon_fn_";

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal, kept as its raw lexeme.
    Number(String),

    /// A variable reference.
    Variable(String),

    /// A unary operator application.
    Unary { op: char, operand: Box<Expr> },

    /// A binary operator application.
    Binary {
        op: char,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// A function call.
    Call { callee: String, args: Vec<Expr> },

    /// An `if`/`then`/`else` expression.
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },

    /// A `for` loop. `step` defaults to 1.0 when absent.
    For {
        var: String,
        init: Box<Expr>,
        cond: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Box<Expr>,
    },

    /// A `var ... in` expression introducing mutable bindings, each with
    /// an optional initializer (0.0 when absent).
    VarIn {
        bindings: Vec<(String, Option<Expr>)>,
        body: Box<Expr>,
    },
}

/// A function signature: name and parameter names. Operator prototypes
/// are named `binary<c>` / `unary<c>` and record the declared precedence
/// for binary ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
    pub is_operator: bool,
    pub precedence: Option<u32>,
}

impl Prototype {
    /// Creates an ordinary (non-operator) prototype.
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
            is_operator: false,
            precedence: None,
        }
    }

    /// Returns `true` for the synthesized wrapper prototypes that hold
    /// top-level expressions.
    pub fn is_anonymous(&self) -> bool {
        self.name.starts_with(ANON_FN_PREFIX)
    }

    /// Returns `true` for `unary<c>` prototypes.
    pub fn is_unary_op(&self) -> bool {
        self.is_operator && self.params.len() == 1
    }

    /// Returns `true` for `binary<c>` prototypes.
    pub fn is_binary_op(&self) -> bool {
        self.is_operator && self.params.len() == 2
    }

    /// The operator character of an operator prototype.
    pub fn operator_char(&self) -> Option<char> {
        if !self.is_operator {
            return None;
        }
        self.name
            .strip_prefix("binary")
            .or_else(|| self.name.strip_prefix("unary"))
            .and_then(|rest| rest.chars().next())
    }
}

/// A function definition: prototype plus body expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub proto: Prototype,
    pub body: Expr,
}

impl Function {
    /// Wraps a top-level expression in a zero-argument anonymous function
    /// so it can be JIT-compiled and invoked.
    pub fn anonymous(body: Expr, sequence: u64) -> Self {
        Self {
            proto: Prototype::new(format!("{}{}", ANON_FN_PREFIX, sequence), Vec::new()),
            body,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.proto.is_anonymous()
    }
}

/// A top-level construct: an `extern` declaration or a function
/// definition (named or anonymous wrapper).
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Prototype(Prototype),
    Function(Function),
}

impl Item {
    /// Returns `true` if this is an anonymous top-level wrapper.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Item::Function(f) if f.is_anonymous())
    }

    /// The prototype of this construct.
    pub fn proto(&self) -> &Prototype {
        match self {
            Item::Prototype(p) => p,
            Item::Function(f) => &f.proto,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(text) => write!(f, "{}", text),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::Unary { op, operand } => write!(f, "({}{})", op, operand),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::If { cond, then, orelse } => {
                write!(f, "(if {} then {} else {})", cond, then, orelse)
            }
            Expr::For {
                var,
                init,
                cond,
                step,
                body,
            } => {
                write!(f, "(for {} = {}, {}", var, init, cond)?;
                if let Some(step) = step {
                    write!(f, ", {}", step)?;
                }
                write!(f, " in {})", body)
            }
            Expr::VarIn { bindings, body } => {
                write!(f, "(var ")?;
                for (i, (name, init)) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", name)?;
                    if let Some(init) = init {
                        write!(f, " = {}", init)?;
                    }
                }
                write!(f, " in {})", body)
            }
        }
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_binary_op() {
            let prec = self.precedence.unwrap_or(crate::ops::DEFAULT_PRECEDENCE as u32);
            write!(
                f,
                "{} {} ({} {})",
                self.name, prec, self.params[0], self.params[1]
            )
        } else if self.is_unary_op() {
            write!(f, "{} ({})", self.name, self.params[0])
        } else {
            write!(f, "{}({})", self.name, self.params.join(" "))
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "{}", self.body)
        } else {
            write!(f, "def {} {}", self.proto, self.body)
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Prototype(proto) => write!(f, "extern {}", proto),
            Item::Function(func) => write!(f, "{}", func),
        }
    }
}
