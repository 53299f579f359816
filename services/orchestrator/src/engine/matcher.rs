//! Batch and constraint membership.

use std::collections::HashMap;

use ferry_expr::Program;
use ferry_types::{Batch, Constraint, Instance, InstanceSnapshot, SourceType};

use super::error::{EngineError, EngineResult};
use crate::db::Transaction;

/// A compiled include expression.
pub struct Matcher {
    owner: String,
    program: Program<InstanceSnapshot>,
}

impl Matcher {
    pub fn for_batch(batch: &Batch) -> EngineResult<Self> {
        let owner = format!("batch '{}'", batch.name);
        let program = batch.program().map_err(|source| EngineError::Expression {
            owner: owner.clone(),
            source,
        })?;
        Ok(Self { owner, program })
    }

    pub fn for_constraint(batch: &str, constraint: &Constraint) -> EngineResult<Self> {
        let owner = format!("constraint '{}' of batch '{batch}'", constraint.name);
        let program = constraint
            .program()
            .map_err(|source| EngineError::Expression {
                owner: owner.clone(),
                source,
            })?;
        Ok(Self { owner, program })
    }

    pub fn matches(&self, snapshot: &InstanceSnapshot) -> EngineResult<bool> {
        self.program
            .run(snapshot)
            .map_err(|source| EngineError::Expression {
                owner: self.owner.clone(),
                source,
            })
    }
}

/// True if `instance`, with overrides applied, satisfies the batch's include
/// expression.
pub fn instance_matches_criteria(
    batch: &Batch,
    instance: &Instance,
    source_type: SourceType,
) -> EngineResult<bool> {
    Matcher::for_batch(batch)?.matches(&InstanceSnapshot::new(instance, source_type))
}

/// Source types by source name, for building snapshots.
#[derive(Debug, Default)]
pub struct SourceTypes(HashMap<String, SourceType>);

impl SourceTypes {
    pub async fn load(tx: &mut dyn Transaction) -> EngineResult<Self> {
        let sources = tx.list_sources().await?;
        Ok(Self(
            sources
                .into_iter()
                .map(|s| (s.name, s.source_type))
                .collect(),
        ))
    }

    pub fn snapshot(&self, instance: &Instance) -> InstanceSnapshot {
        let source_type = self.0.get(&instance.source).copied().unwrap_or_default();
        InstanceSnapshot::new(instance, source_type)
    }
}
