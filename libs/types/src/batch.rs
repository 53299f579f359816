//! Batches and their constraints.

use std::collections::HashSet;

use chrono::Duration;
use ferry_expr::{ExprError, Program};
use ferry_id::validate_name;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::snapshot::InstanceSnapshot;
use crate::status::BatchStatus;

/// A limit applied to the instances of a batch that match an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub include_expression: String,
    /// Maximum number of matching instances in final import at once.
    /// Zero means unlimited.
    #[serde(default)]
    pub max_concurrent_instances: i64,
    /// Minimum time a matching instance needs to boot after cutover; the
    /// window used for its final import must leave at least this much room.
    #[serde(default)]
    pub min_instance_boot_time_secs: i64,
}

impl Constraint {
    pub fn program(&self) -> Result<Program<InstanceSnapshot>, ExprError> {
        Program::compile(&self.include_expression)
    }

    pub fn min_instance_boot_time(&self) -> Duration {
        Duration::seconds(self.min_instance_boot_time_secs.max(0))
    }

    fn validate(&self, batch: &str) -> Result<(), ValidationError> {
        validate_name(&self.name).map_err(|source| ValidationError::Name {
            field: "constraint name",
            source,
        })?;
        self.program()
            .map_err(|source| ValidationError::Expression {
                owner: format!("constraint '{}' of batch '{batch}'", self.name),
                source,
            })?;
        if self.max_concurrent_instances < 0 {
            return Err(ValidationError::Negative {
                field: format!("constraint '{}' max_concurrent_instances", self.name),
                value: self.max_concurrent_instances,
            });
        }
        if self.min_instance_boot_time_secs < 0 {
            return Err(ValidationError::Negative {
                field: format!("constraint '{}' min_instance_boot_time_secs", self.name),
                value: self.min_instance_boot_time_secs,
            });
        }
        Ok(())
    }
}

/// A group of instances migrated together.
///
/// Membership is derived: an instance belongs to the batch while its
/// properties satisfy `include_expression` (see the orchestrator's
/// reconciler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub name: String,
    /// Name of the target environment.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_pool: Option<String>,
    pub include_expression: String,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub status: BatchStatus,
    #[serde(default)]
    pub status_message: String,
}

impl Batch {
    pub fn program(&self) -> Result<Program<InstanceSnapshot>, ExprError> {
        Program::compile(&self.include_expression)
    }

    /// Check everything that can be checked without storage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name).map_err(|source| ValidationError::Name {
            field: "batch name",
            source,
        })?;
        if self.target.is_empty() {
            return Err(ValidationError::Missing {
                field: "batch target",
            });
        }
        if self.include_expression.trim().is_empty() {
            return Err(ValidationError::Missing {
                field: "batch include_expression",
            });
        }
        self.program()
            .map_err(|source| ValidationError::Expression {
                owner: format!("batch '{}'", self.name),
                source,
            })?;

        let mut seen = HashSet::new();
        for constraint in &self.constraints {
            constraint.validate(&self.name)?;
            if !seen.insert(constraint.name.as_str()) {
                return Err(ValidationError::DuplicateName {
                    kind: "constraint",
                    name: constraint.name.clone(),
                });
            }
        }
        Ok(())
    }
}
