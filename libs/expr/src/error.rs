//! Error types for compiling and evaluating expressions.

use thiserror::Error;

use crate::value::Kind;

/// Result type for expression operations.
pub type ExprResult<T> = Result<T, ExprError>;

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    /// The source text is not a well-formed expression.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// The expression nests deeper than the parser allows.
    #[error("expression nesting exceeds {0} levels")]
    TooDeep(usize),

    /// A referenced field does not exist on the subject.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// A called function does not exist.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("{function}() takes {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: usize,
        actual: usize,
    },

    /// A function was called with an argument of the wrong kind.
    #[error("{function}() expects a {expected} argument, got {actual}")]
    ArgumentType {
        function: String,
        expected: Kind,
        actual: Kind,
    },

    /// Operands do not fit the operator.
    #[error("type mismatch: {0}")]
    Type(String),

    /// The expression does not produce a boolean.
    #[error("expression must evaluate to bool, got {0}")]
    NotBoolean(Kind),

    /// List or string index out of range.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
}

impl ExprError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Returns true if the source text could not be parsed.
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. } | Self::TooDeep(_))
    }
}
