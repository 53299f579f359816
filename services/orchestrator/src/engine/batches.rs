//! Batch lifecycle.

use chrono::Utc;
use ferry_types::{Batch, BatchStatus, Instance, MigrationStatus, QueueEntry};
use tracing::{info, instrument, warn};

use super::error::{EngineError, EngineResult};
use super::reconciler::{self, assign_to_first_match, drop_leftover_entry, reconcile_batch};
use super::Engine;
use crate::db::{BatchFilter, InstanceFilter, QueueFilter};

impl Engine {
    /// Create a batch and pull in every unassigned instance it matches.
    #[instrument(skip(self, batch), fields(batch = %batch.name))]
    pub async fn create_batch(&self, mut batch: Batch) -> EngineResult<Batch> {
        batch.status = BatchStatus::Defined;
        batch.status_message.clear();
        batch.validate()?;

        let mut tx = self.begin().await?;
        tx.create_batch(&batch).await?;
        let stats = reconcile_batch(tx.as_mut(), &batch).await?;
        tx.commit().await?;

        info!(batch = %batch.name, members = stats.assigned, "Created batch");
        Ok(batch)
    }

    /// Replace the definition of a batch that has not started.
    ///
    /// Status is kept; the batch cannot be renamed.
    #[instrument(skip(self, batch))]
    pub async fn update_batch(&self, name: &str, mut batch: Batch) -> EngineResult<Batch> {
        if batch.name != name {
            return Err(EngineError::not_permitted(format!(
                "batch '{name}' cannot be renamed to '{}'",
                batch.name
            )));
        }

        let mut tx = self.begin().await?;
        let current = tx.get_batch(name).await?;
        if !current.status.can_be_modified() {
            return Err(EngineError::not_permitted(format!(
                "batch '{name}' is {} and cannot be modified",
                current.status
            )));
        }

        batch.status = current.status;
        batch.status_message = current.status_message;
        batch.validate()?;

        tx.update_batch(&batch).await?;
        let stats = reconcile_batch(tx.as_mut(), &batch).await?;
        tx.commit().await?;

        info!(
            batch = %name,
            assigned = stats.assigned,
            unassigned = stats.unassigned,
            "Updated batch"
        );
        Ok(batch)
    }

    /// Delete a batch with no migrating instances.
    ///
    /// Members are released and matched against the remaining batches.
    #[instrument(skip(self))]
    pub async fn delete_batch(&self, name: &str) -> EngineResult<()> {
        let mut tx = self.begin().await?;
        tx.get_batch(name).await?;

        let members = tx.list_instances(&[InstanceFilter::in_batch(name)]).await?;
        let entries = tx.list_queue_entries(&[QueueFilter::in_batch(name)]).await?;
        let finished = |i: &Instance| i.status == MigrationStatus::ImportComplete;
        if entries.iter().any(QueueEntry::is_migrating)
            || members.iter().any(|i| i.is_migrating() && !finished(i))
        {
            return Err(EngineError::not_permitted(format!(
                "batch '{name}' has migrating instances"
            )));
        }

        let mut released = Vec::with_capacity(members.len());
        for mut instance in members {
            if finished(&instance) {
                instance.batch = None;
                tx.update_instance(&instance).await?;
                continue;
            }
            reconciler::unassign(&mut instance);
            tx.update_instance(&instance).await?;
            released.push(instance);
        }
        for entry in &entries {
            tx.delete_queue_entry(entry.instance).await?;
        }
        for window in tx.list_windows(name).await? {
            tx.delete_window(name, &window.name).await?;
        }
        tx.delete_batch(name).await?;

        let mut reassigned = 0;
        for mut instance in released {
            if assign_to_first_match(tx.as_mut(), &mut instance).await?.is_some() {
                tx.update_instance(&instance).await?;
                reassigned += 1;
            }
        }

        tx.commit().await?;

        for entry in &entries {
            self.contacts.forget(entry.instance);
        }
        info!(batch = %name, reassigned, "Deleted batch");
        Ok(())
    }

    pub async fn get_batch(&self, name: &str) -> EngineResult<Batch> {
        let mut tx = self.begin().await?;
        Ok(tx.get_batch(name).await?)
    }

    pub async fn list_batches(&self, status: Option<BatchStatus>) -> EngineResult<Vec<Batch>> {
        let filters: Vec<BatchFilter> = status.into_iter().map(BatchFilter::with_status).collect();
        let mut tx = self.begin().await?;
        Ok(tx.list_batches(&filters).await?)
    }

    /// Instances currently assigned to `name`.
    pub async fn batch_instances(&self, name: &str) -> EngineResult<Vec<Instance>> {
        let mut tx = self.begin().await?;
        tx.get_batch(name).await?;
        Ok(tx.list_instances(&[InstanceFilter::in_batch(name)]).await?)
    }

    /// Queue every eligible member of the batch and mark it running.
    ///
    /// Members in `Error` from an earlier run are queued again.
    #[instrument(skip(self))]
    pub async fn start_batch(&self, name: &str) -> EngineResult<Batch> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut batch = tx.get_batch(name).await?;
        if !batch.status.can_start() {
            return Err(EngineError::not_permitted(format!(
                "batch '{name}' is {} and cannot be started",
                batch.status
            )));
        }

        let windows = tx.list_windows(name).await?;
        if !windows.is_empty()
            && !windows
                .iter()
                .any(|w| w.validate(now).is_ok() && !w.is_locked(now))
        {
            return Err(EngineError::not_permitted(format!(
                "batch '{name}' has no usable migration window"
            )));
        }

        let members = tx.list_instances(&[InstanceFilter::in_batch(name)]).await?;
        let in_flight = members.iter().filter(|i| i.is_migrating()).count();
        let eligible: Vec<Instance> = members
            .into_iter()
            .filter(|i| {
                matches!(
                    i.status,
                    MigrationStatus::AssignedToBatch | MigrationStatus::Error
                )
            })
            .collect();
        if eligible.is_empty() && in_flight == 0 {
            return Err(EngineError::not_permitted(format!(
                "batch '{name}' has no instances to migrate"
            )));
        }

        let queued = eligible.len();
        for mut instance in eligible {
            drop_leftover_entry(tx.as_mut(), instance.uuid).await?;

            let entry = QueueEntry::new(instance.uuid, name);
            tx.create_queue_entry(&entry).await?;

            instance.status = entry.status;
            instance.status_message.clear();
            instance.needs_disk_import = entry.needs_disk_import;
            tx.update_instance(&instance).await?;
        }

        batch.status = BatchStatus::Running;
        batch.status_message.clear();
        tx.update_batch(&batch).await?;
        tx.commit().await?;

        info!(batch = %name, queued, in_flight, "Started batch");
        Ok(batch)
    }

    /// Stop a running batch; its workers are told to idle.
    #[instrument(skip(self))]
    pub async fn stop_batch(&self, name: &str) -> EngineResult<Batch> {
        let mut tx = self.begin().await?;
        let mut batch = tx.get_batch(name).await?;
        if batch.status != BatchStatus::Running {
            warn!(batch = %name, status = %batch.status, "Stop requested for batch that is not running");
            return Err(EngineError::not_permitted(format!(
                "batch '{name}' is {} and cannot be stopped",
                batch.status
            )));
        }

        batch.status = BatchStatus::Stopped;
        batch.status_message.clear();
        tx.update_batch(&batch).await?;
        tx.commit().await?;

        info!(batch = %name, "Stopped batch");
        Ok(batch)
    }
}
