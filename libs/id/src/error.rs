//! Error types for ID parsing and name validation.

use thiserror::Error;

/// Errors that can occur when parsing IDs or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID or name is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The UUID portion of the ID is invalid.
    #[error("invalid {kind} '{value}': {message}")]
    InvalidUuid {
        kind: &'static str,
        value: String,
        message: String,
    },

    /// The name is longer than allowed.
    #[error("name '{name}' is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },

    /// The name contains a character that is not allowed.
    #[error("name '{name}' contains invalid character {found:?}")]
    InvalidCharacter { name: String, found: char },

    /// The name is otherwise malformed.
    #[error("invalid name '{name}': {message}")]
    InvalidName { name: String, message: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}
