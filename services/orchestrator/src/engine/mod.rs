//! Migration orchestration engine.
//!
//! The engine owns every state transition of batches, instances, windows and
//! queue entries. Each public operation runs inside one storage transaction:
//! it either commits as a whole or, on any error, the transaction is dropped
//! and rolled back.
//!
//! - [`matcher`]: include-expression evaluation
//! - [`reconciler`]: batch membership
//! - [`windows`]: window replacement
//! - `dispatcher`: worker commands and status reports
//! - `progress`: provisioning and finalization of running batches

mod batches;
mod contact;
mod dispatcher;
mod error;
mod instances;
pub mod matcher;
mod placement;
mod progress;
mod queue;
pub mod reconciler;
pub mod windows;

use std::sync::Arc;

pub use contact::WorkerContacts;
pub use error::{EngineError, EngineResult};
pub use placement::{BatchDefaults, MockProvisioner, Placement, PlacementResult, TargetProvisioner};
pub use progress::ProgressStats;
pub use queue::QueueView;

use crate::db::{Store, Transaction};

/// Entry point for all orchestration operations.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    placement: Arc<dyn Placement>,
    provisioner: Arc<dyn TargetProvisioner>,
    contacts: Arc<WorkerContacts>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        placement: Arc<dyn Placement>,
        provisioner: Arc<dyn TargetProvisioner>,
    ) -> Self {
        Self {
            store,
            placement,
            provisioner,
            contacts: Arc::new(WorkerContacts::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn contacts(&self) -> &WorkerContacts {
        &self.contacts
    }

    async fn begin(&self) -> EngineResult<Box<dyn Transaction>> {
        Ok(self.store.begin().await?)
    }
}
