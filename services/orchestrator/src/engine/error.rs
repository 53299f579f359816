//! Engine error types.

use ferry_expr::ExprError;
use ferry_id::InstanceId;
use ferry_types::ValidationError;
use thiserror::Error;

use crate::db::DbError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A referenced entity does not exist, or is not eligible for the
    /// requested update.
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    /// A business rule forbids the operation.
    #[error("{0}")]
    NotPermitted(String),

    /// A storage uniqueness or referential constraint was violated.
    #[error(transparent)]
    Constraint(DbError),

    /// The worker presented the wrong secret.
    #[error("invalid worker secret for instance '{0}'")]
    InvalidSecret(InstanceId),

    /// A stored expression failed to evaluate.
    #[error("failed to evaluate expression of {owner}: {source}")]
    Expression {
        owner: String,
        #[source]
        source: ExprError,
    },

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[source] DbError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn not_permitted(message: impl Into<String>) -> Self {
        Self::NotPermitted(message.into())
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, key } => Self::NotFound { entity, key },
            DbError::Conflict { .. } | DbError::ForeignKey { .. } => Self::Constraint(err),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_errors_are_classified() {
        assert!(matches!(
            EngineError::from(DbError::not_found("batch", "b1")),
            EngineError::NotFound { entity: "batch", .. }
        ));
        assert!(matches!(
            EngineError::from(DbError::conflict("batch", "b1")),
            EngineError::Constraint(_)
        ));
        assert!(matches!(
            EngineError::from(DbError::Corrupt {
                entity: "batch",
                message: "bad".into()
            }),
            EngineError::Storage(_)
        ));
    }
}
