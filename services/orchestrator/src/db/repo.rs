//! Repository contracts.
//!
//! Every read and write goes through a [`Transaction`] obtained from a
//! [`Store`]. A transaction that is dropped without [`Transaction::commit`]
//! is rolled back, so an early return through `?` never leaves a partial
//! write behind.
//!
//! List operations take a slice of filters. Fields set within one filter
//! must all match; an item is returned if any filter matches; an empty
//! slice matches everything.

use async_trait::async_trait;
use ferry_id::InstanceId;
use ferry_types::{Batch, BatchStatus, Instance, MigrationStatus, QueueEntry, Source, Window};

use super::DbError;

/// A source of transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Begin a serializable transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;

    /// Check the backing storage is reachable.
    async fn health_check(&self) -> Result<(), DbError>;
}

/// Per-entity CRUD scoped to one transaction.
#[async_trait]
pub trait Transaction: Send {
    // Sources
    async fn create_source(&mut self, source: &Source) -> Result<(), DbError>;
    async fn get_source(&mut self, name: &str) -> Result<Source, DbError>;
    async fn list_sources(&mut self) -> Result<Vec<Source>, DbError>;

    // Batches
    async fn create_batch(&mut self, batch: &Batch) -> Result<(), DbError>;
    async fn get_batch(&mut self, name: &str) -> Result<Batch, DbError>;
    async fn list_batches(&mut self, filters: &[BatchFilter]) -> Result<Vec<Batch>, DbError>;
    async fn update_batch(&mut self, batch: &Batch) -> Result<(), DbError>;
    async fn delete_batch(&mut self, name: &str) -> Result<(), DbError>;

    // Instances
    async fn create_instance(&mut self, instance: &Instance) -> Result<(), DbError>;
    async fn get_instance(&mut self, uuid: InstanceId) -> Result<Instance, DbError>;
    async fn list_instances(
        &mut self,
        filters: &[InstanceFilter],
    ) -> Result<Vec<Instance>, DbError>;
    async fn update_instance(&mut self, instance: &Instance) -> Result<(), DbError>;
    async fn delete_instance(&mut self, uuid: InstanceId) -> Result<(), DbError>;

    // Windows, ordered by start
    async fn create_window(&mut self, window: &Window) -> Result<(), DbError>;
    async fn list_windows(&mut self, batch: &str) -> Result<Vec<Window>, DbError>;
    async fn update_window(&mut self, window: &Window) -> Result<(), DbError>;
    async fn delete_window(&mut self, batch: &str, name: &str) -> Result<(), DbError>;

    // Queue
    async fn create_queue_entry(&mut self, entry: &QueueEntry) -> Result<(), DbError>;
    async fn get_queue_entry(&mut self, instance: InstanceId) -> Result<QueueEntry, DbError>;
    async fn list_queue_entries(
        &mut self,
        filters: &[QueueFilter],
    ) -> Result<Vec<QueueEntry>, DbError>;
    async fn update_queue_entry(&mut self, entry: &QueueEntry) -> Result<(), DbError>;
    async fn delete_queue_entry(&mut self, instance: InstanceId) -> Result<(), DbError>;

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<(), DbError>;
}

// =============================================================================
// Filters
// =============================================================================

/// Batch assignment of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Unassigned,
    Batch(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub uuid: Option<InstanceId>,
    pub source: Option<String>,
    pub assignment: Option<Assignment>,
    pub status: Option<MigrationStatus>,
}

impl InstanceFilter {
    pub fn in_batch(batch: impl Into<String>) -> Self {
        Self {
            assignment: Some(Assignment::Batch(batch.into())),
            ..Default::default()
        }
    }

    pub fn unassigned() -> Self {
        Self {
            assignment: Some(Assignment::Unassigned),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: MigrationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        if self.uuid.is_some_and(|uuid| uuid != instance.uuid) {
            return false;
        }
        if self.source.as_ref().is_some_and(|s| *s != instance.source) {
            return false;
        }
        match &self.assignment {
            Some(Assignment::Unassigned) if instance.batch.is_some() => return false,
            Some(Assignment::Batch(name)) if instance.batch.as_ref() != Some(name) => {
                return false
            }
            _ => {}
        }
        self.status.is_none_or(|status| status == instance.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFilter {
    pub name: Option<String>,
    pub status: Option<BatchStatus>,
}

impl BatchFilter {
    pub fn with_status(status: BatchStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, batch: &Batch) -> bool {
        self.name.as_ref().is_none_or(|name| *name == batch.name)
            && self.status.is_none_or(|status| status == batch.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub instance: Option<InstanceId>,
    pub batch: Option<String>,
    pub status: Option<MigrationStatus>,
    pub window: Option<String>,
}

impl QueueFilter {
    pub fn in_batch(batch: impl Into<String>) -> Self {
        Self {
            batch: Some(batch.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: MigrationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = Some(window.into());
        self
    }

    pub fn matches(&self, entry: &QueueEntry) -> bool {
        self.instance.is_none_or(|uuid| uuid == entry.instance)
            && self.batch.as_ref().is_none_or(|b| *b == entry.batch)
            && self.status.is_none_or(|status| status == entry.status)
            && self
                .window
                .as_ref()
                .is_none_or(|w| entry.window.as_ref() == Some(w))
    }
}

/// True if `item` matches any filter, or `filters` is empty.
pub(crate) fn any_match<T>(filters: &[T], item: impl Fn(&T) -> bool) -> bool {
    filters.is_empty() || filters.iter().any(item)
}
