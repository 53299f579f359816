//! Queue entries: instances under active migration.

use ferry_id::{InstanceId, WorkerSecret};
use serde::{Deserialize, Serialize};

use crate::status::MigrationStatus;

/// Active-migration record of one instance.
///
/// The entry mirrors the instance's migration status; both are written in
/// the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub instance: InstanceId,
    pub batch: String,
    /// Token the worker must present on every call.
    #[serde(skip_serializing, default)]
    pub secret: WorkerSecret,
    pub status: MigrationStatus,
    #[serde(default)]
    pub status_message: String,
    /// Window the final import was scheduled in, once reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(default)]
    pub needs_disk_import: bool,
}

impl QueueEntry {
    /// A new entry for an instance entering migration.
    pub fn new(instance: InstanceId, batch: impl Into<String>) -> Self {
        Self {
            instance,
            batch: batch.into(),
            secret: WorkerSecret::new(),
            status: MigrationStatus::Creating,
            status_message: String::new(),
            window: None,
            needs_disk_import: true,
        }
    }

    pub fn is_migrating(&self) -> bool {
        self.status.is_migrating()
    }
}
