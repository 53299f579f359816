//! Database error types.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The requested row does not exist.
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    /// A unique constraint was violated.
    #[error("{entity} '{key}' already exists")]
    Conflict { entity: &'static str, key: String },

    /// A referential constraint was violated.
    #[error("{entity} '{key}': {message}")]
    ForeignKey {
        entity: &'static str,
        key: String,
        message: String,
    },

    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/orchestrator.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A stored value could not be decoded.
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        entity: &'static str,
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl ToString) -> Self {
        Self::Conflict {
            entity,
            key: key.to_string(),
        }
    }

    pub fn foreign_key(entity: &'static str, key: impl ToString, message: impl Into<String>) -> Self {
        Self::ForeignKey {
            entity,
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify a failed statement, mapping constraint violations to their
    /// own variants.
    pub(crate) fn from_query(entity: &'static str, key: impl ToString, err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return Self::not_found(entity, key);
        }
        if let Some(db_err) = err.as_database_error() {
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => return Self::conflict(entity, key),
                // foreign_key_violation
                Some("23503") => {
                    return Self::foreign_key(entity, key, db_err.message().to_string())
                }
                _ => {}
            }
        }
        Self::Query(err)
    }
}
