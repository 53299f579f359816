//! Target-side collaborators.
//!
//! Placement decides where an instance lands; the provisioner creates the
//! target instance (and the worker inside it) and finalizes it once the
//! import completes. Both talk to external systems and report failures as
//! `anyhow` errors, which the engine records on the queue entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use ferry_id::{InstanceId, WorkerSecret};
use ferry_types::{Batch, Instance, QueueEntry};
use serde::Serialize;
use tracing::{debug, info};

/// Where an instance is created on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementResult {
    pub target: String,
    pub project: Option<String>,
    pub storage_pool: Option<String>,
}

/// Decides the target location of an instance.
#[async_trait]
pub trait Placement: Send + Sync {
    async fn place(&self, instance: &Instance, batch: &Batch) -> Result<PlacementResult>;
}

/// Places every instance according to its batch defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchDefaults;

#[async_trait]
impl Placement for BatchDefaults {
    async fn place(&self, _instance: &Instance, batch: &Batch) -> Result<PlacementResult> {
        Ok(PlacementResult {
            target: batch.target.clone(),
            project: batch.target_project.clone(),
            storage_pool: batch.storage_pool.clone(),
        })
    }
}

/// Creates and finalizes instances on the target.
#[async_trait]
pub trait TargetProvisioner: Send + Sync {
    /// Create the target instance and start a worker for `entry`.
    ///
    /// The worker must be handed `entry.secret`.
    async fn create_instance(
        &self,
        instance: &Instance,
        placement: &PlacementResult,
        entry: &QueueEntry,
    ) -> Result<()>;

    /// Switch the target instance over after the final import.
    async fn finalize_instance(&self, instance: &Instance, batch: &Batch) -> Result<()>;
}

/// Mock provisioner for testing and development.
pub struct MockProvisioner {
    /// Counter of created instances.
    created: AtomicU64,

    /// Whether creates should "fail".
    fail_creates: bool,

    /// Worker secrets handed out, by instance.
    secrets: Mutex<HashMap<InstanceId, WorkerSecret>>,
}

impl MockProvisioner {
    /// Create a new mock provisioner.
    pub fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            fail_creates: false,
            secrets: Mutex::new(HashMap::new()),
        }
    }

    /// Create a mock provisioner that fails all creates.
    pub fn failing() -> Self {
        Self {
            fail_creates: true,
            ..Self::new()
        }
    }

    /// Number of instances created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Secret handed to the worker of `instance`.
    pub fn secret_for(&self, instance: InstanceId) -> Option<WorkerSecret> {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance)
            .copied()
    }
}

impl Default for MockProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetProvisioner for MockProvisioner {
    async fn create_instance(
        &self,
        instance: &Instance,
        placement: &PlacementResult,
        entry: &QueueEntry,
    ) -> Result<()> {
        if self.fail_creates {
            anyhow::bail!("Mock provisioner configured to fail");
        }

        info!(
            instance = %instance.uuid,
            target = %placement.target,
            project = ?placement.project,
            "[MOCK] Creating target instance"
        );

        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.instance, entry.secret);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize_instance(&self, instance: &Instance, batch: &Batch) -> Result<()> {
        debug!(
            instance = %instance.uuid,
            batch = %batch.name,
            "[MOCK] Finalizing target instance"
        );
        Ok(())
    }
}
