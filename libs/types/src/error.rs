//! Validation errors.

use chrono::{DateTime, Utc};
use ferry_expr::ExprError;
use ferry_id::IdError;
use thiserror::Error;

/// A malformed entity. Always raised before anything is persisted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A name failed identifier validation.
    #[error("invalid {field}: {source}")]
    Name {
        field: &'static str,
        #[source]
        source: IdError,
    },

    /// An include expression does not compile.
    #[error("invalid expression for {owner}: {source}")]
    Expression {
        owner: String,
        #[source]
        source: ExprError,
    },

    /// A required field is empty.
    #[error("{field} is required")]
    Missing { field: &'static str },

    /// A numeric field is negative.
    #[error("{field} must not be negative, got {value}")]
    Negative { field: String, value: i64 },

    /// Two entries of one set share a name.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    /// A window ends before it starts.
    #[error("window '{window}' ends at {end} before it starts at {start}")]
    EndBeforeStart {
        window: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A window already ended.
    #[error("window '{window}' ended at {end}, which is in the past")]
    EndInPast { window: String, end: DateTime<Utc> },

    /// A window lockout lies outside its start/end bounds.
    #[error("window '{window}' lockout {lockout} is outside the window bounds")]
    LockoutOutOfRange {
        window: String,
        lockout: DateTime<Utc>,
    },

    /// Two windows of one batch overlap.
    #[error("windows '{first}' and '{second}' overlap")]
    Overlap { first: String, second: String },
}

/// A stored status string that does not name a known status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}
