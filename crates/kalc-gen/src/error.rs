//! Error types for LLVM IR generation.

use thiserror::Error;

/// Error type for IR generation.
///
/// After any of these, the module may be left in an inconsistent state
/// (e.g. a half-built function body); callers are expected to rebuild it
/// by replaying the declaration history.
#[derive(Debug, Error)]
pub enum CodeGenError {
    /// Reference to a name with no stack slot in scope.
    #[error("unknown variable name '{0}'")]
    UnknownVariable(String),

    /// Binary operator that is neither built in nor defined as a
    /// `binary<op>` function.
    #[error("unknown binary operator '{0}'")]
    UnknownBinaryOp(char),

    /// Unary operator with no `unary<op>` function defined.
    #[error("unknown unary operator '{0}'")]
    UnknownUnaryOp(char),

    /// The left-hand side of `=` was not a plain variable reference.
    #[error("the left-hand side of the assignment operator '=' must be a variable")]
    AssignLhsNotVariable,

    /// Call to a name that is not a known function.
    #[error("call to unknown function '{0}'")]
    UnknownCallee(String),

    /// Call or redeclaration with the wrong number of arguments.
    #[error("wrong number of arguments for '{name}': expected {expected}, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// A function name clashing with a non-function global.
    #[error("function/global name collision '{0}'")]
    NameCollision(String),

    /// A second definition for an already-defined function.
    #[error("redefinition of '{0}'")]
    Redefinition(String),

    /// A number lexeme that does not convert to a double (e.g. `1.2.3`).
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    /// LLVM operation failed.
    #[error("LLVM operation failed: {0}")]
    LlvmOperationFailed(String),
}

/// Result type alias for IR generation operations.
pub type Result<T> = std::result::Result<T, CodeGenError>;
