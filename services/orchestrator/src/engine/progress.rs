//! Provisioning and finalization of running batches.
//!
//! Calls to the placement and provisioning collaborators happen outside any
//! storage transaction. The entry is re-read afterwards and only updated if
//! nothing else moved it in the meantime.

use ferry_types::{Batch, BatchStatus, MigrationStatus, QueueEntry};
use tracing::{error, info, instrument, warn};

use super::error::EngineResult;
use super::Engine;
use crate::db::{BatchFilter, QueueFilter};

/// Outcome of one progress pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStats {
    pub provisioned: usize,
    pub failed: usize,
    pub finalized: usize,
    pub finished_batches: usize,
}

enum Outcome {
    Ok,
    Failed(String),
}

impl Engine {
    /// Run one progress pass over every running batch.
    #[instrument(skip(self))]
    pub async fn advance(&self) -> EngineResult<ProgressStats> {
        let mut stats = ProgressStats::default();

        let batches = {
            let mut tx = self.begin().await?;
            tx.list_batches(&[BatchFilter::with_status(BatchStatus::Running)])
                .await?
        };

        for batch in batches {
            self.advance_batch(&batch, &mut stats).await?;
        }

        if stats != ProgressStats::default() {
            info!(
                provisioned = stats.provisioned,
                failed = stats.failed,
                finalized = stats.finalized,
                finished_batches = stats.finished_batches,
                "Progress pass complete"
            );
        }
        Ok(stats)
    }

    async fn advance_batch(&self, batch: &Batch, stats: &mut ProgressStats) -> EngineResult<()> {
        let entries = {
            let mut tx = self.begin().await?;
            tx.list_queue_entries(&[QueueFilter::in_batch(&batch.name)])
                .await?
        };

        for entry in entries {
            match entry.status {
                MigrationStatus::Creating => {
                    match self.provision(batch, &entry).await? {
                        Outcome::Ok => stats.provisioned += 1,
                        Outcome::Failed(_) => stats.failed += 1,
                    }
                }
                MigrationStatus::ImportComplete => match self.finalize(batch, &entry).await? {
                    Outcome::Ok => stats.finalized += 1,
                    Outcome::Failed(_) => stats.failed += 1,
                },
                _ => {}
            }
        }

        if self.finish_if_done(&batch.name).await? {
            stats.finished_batches += 1;
        }
        Ok(())
    }

    /// Create the target instance of a `Creating` entry.
    async fn provision(&self, batch: &Batch, entry: &QueueEntry) -> EngineResult<Outcome> {
        let instance = {
            let mut tx = self.begin().await?;
            tx.get_instance(entry.instance).await?
        };

        let result = match self.placement.place(&instance, batch).await {
            Ok(placement) => self
                .provisioner
                .create_instance(&instance, &placement, entry)
                .await
                .map(|()| placement),
            Err(err) => Err(err),
        };

        let (status, outcome) = match result {
            Ok(placement) => {
                info!(
                    instance = %instance.uuid,
                    batch = %batch.name,
                    target = %placement.target,
                    "Provisioned target instance"
                );
                (MigrationStatus::Idle, Outcome::Ok)
            }
            Err(err) => {
                error!(instance = %instance.uuid, batch = %batch.name, error = %err, "Provisioning failed");
                (MigrationStatus::Error, Outcome::Failed(err.to_string()))
            }
        };

        self.settle(entry, MigrationStatus::Creating, status, &outcome)
            .await?;
        Ok(outcome)
    }

    /// Switch over an `ImportComplete` entry and release its queue slot.
    async fn finalize(&self, batch: &Batch, entry: &QueueEntry) -> EngineResult<Outcome> {
        let instance = {
            let mut tx = self.begin().await?;
            tx.get_instance(entry.instance).await?
        };

        if let Err(err) = self.provisioner.finalize_instance(&instance, batch).await {
            error!(instance = %instance.uuid, batch = %batch.name, error = %err, "Finalization failed");
            let outcome = Outcome::Failed(err.to_string());
            self.settle(
                entry,
                MigrationStatus::ImportComplete,
                MigrationStatus::Error,
                &outcome,
            )
            .await?;
            return Ok(outcome);
        }

        let mut tx = self.begin().await?;
        let current = tx.get_queue_entry(entry.instance).await?;
        if current.status != MigrationStatus::ImportComplete {
            warn!(instance = %entry.instance, status = %current.status, "Queue entry moved during finalization");
            return Ok(Outcome::Ok);
        }
        let mut instance = tx.get_instance(entry.instance).await?;
        instance.status_message = "Migration finished".to_string();
        tx.update_instance(&instance).await?;
        tx.delete_queue_entry(entry.instance).await?;
        tx.commit().await?;

        self.contacts.forget(entry.instance);
        info!(instance = %entry.instance, batch = %batch.name, "Migration finished");
        Ok(Outcome::Ok)
    }

    /// Move an entry and its instance from `from` to `to` if it is still in
    /// `from`.
    async fn settle(
        &self,
        entry: &QueueEntry,
        from: MigrationStatus,
        to: MigrationStatus,
        outcome: &Outcome,
    ) -> EngineResult<()> {
        let mut tx = self.begin().await?;
        let mut current = tx.get_queue_entry(entry.instance).await?;
        if current.status != from {
            warn!(instance = %entry.instance, status = %current.status, "Queue entry moved concurrently");
            return Ok(());
        }
        let mut instance = tx.get_instance(entry.instance).await?;

        let message = match outcome {
            Outcome::Ok => String::new(),
            Outcome::Failed(message) => message.clone(),
        };
        current.status = to;
        current.status_message = message.clone();
        if to == MigrationStatus::Idle {
            current.needs_disk_import = true;
        }
        instance.status = to;
        instance.status_message = message;
        instance.needs_disk_import = current.needs_disk_import;

        tx.update_queue_entry(&current).await?;
        tx.update_instance(&instance).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Mark a running batch finished once nothing is in flight.
    async fn finish_if_done(&self, name: &str) -> EngineResult<bool> {
        let mut tx = self.begin().await?;
        let mut batch = tx.get_batch(name).await?;
        if batch.status != BatchStatus::Running {
            return Ok(false);
        }

        let entries = tx.list_queue_entries(&[QueueFilter::in_batch(name)]).await?;
        if entries.iter().any(QueueEntry::is_migrating) {
            return Ok(false);
        }

        let failed = entries
            .iter()
            .filter(|e| e.status == MigrationStatus::Error)
            .count();
        if failed > 0 {
            batch.status = BatchStatus::Error;
            batch.status_message = format!("{failed} instance(s) failed to migrate");
        } else {
            batch.status = BatchStatus::Finished;
            batch.status_message.clear();
        }
        tx.update_batch(&batch).await?;
        tx.commit().await?;

        info!(batch = %name, status = %batch.status, "Batch completed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use ferry_types::{WorkerCommandKind, WorkerResponse, WorkerResponseKind};

    use super::*;
    use crate::engine::testing::{batch, engine, engine_with, instance};
    use crate::engine::MockProvisioner;

    #[tokio::test]
    async fn test_creating_entries_become_idle() {
        let (engine, provisioner) = engine().await;
        let vm = engine.create_instance(instance("web1")).await.unwrap();
        engine.create_batch(batch("b1", "true")).await.unwrap();
        engine.start_batch("b1").await.unwrap();

        let stats = engine.advance().await.unwrap();
        assert_eq!(stats.provisioned, 1);
        assert_eq!(provisioner.created(), 1);

        let entry = engine.get_queue_entry(vm.uuid).await.unwrap().entry;
        assert_eq!(entry.status, MigrationStatus::Idle);
        assert!(entry.needs_disk_import);

        let again = engine.advance().await.unwrap();
        assert_eq!(again, ProgressStats::default());
    }

    #[tokio::test]
    async fn test_provisioning_failure_fails_batch() {
        let (engine, _) = engine_with(MockProvisioner::failing()).await;
        let vm = engine.create_instance(instance("web1")).await.unwrap();
        engine.create_batch(batch("b1", "true")).await.unwrap();
        engine.start_batch("b1").await.unwrap();

        let stats = engine.advance().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.finished_batches, 1);

        let vm = engine.get_instance(vm.uuid).await.unwrap();
        assert_eq!(vm.status, MigrationStatus::Error);
        assert!(vm.status_message.contains("configured to fail"));
        assert_eq!(
            engine.get_batch("b1").await.unwrap().status,
            BatchStatus::Error
        );
    }

    #[tokio::test]
    async fn test_completed_imports_are_finalized() {
        let (engine, provisioner) = engine().await;
        let mut vm = instance("web1");
        vm.properties.background_import = false;
        let vm = engine.create_instance(vm).await.unwrap();
        engine.create_batch(batch("b1", "true")).await.unwrap();
        engine.start_batch("b1").await.unwrap();
        engine.advance().await.unwrap();

        let secret = provisioner.secret_for(vm.uuid).unwrap();
        let cmd = engine.new_worker_command(vm.uuid, secret).await.unwrap();
        assert_eq!(cmd.command, WorkerCommandKind::FinalizeImport);
        engine
            .process_worker_update(
                vm.uuid,
                secret,
                WorkerResponse {
                    status: WorkerResponseKind::Success,
                    status_message: String::new(),
                },
            )
            .await
            .unwrap();

        assert!(engine.contacts().last_contact(vm.uuid).is_some());

        let stats = engine.advance().await.unwrap();
        assert_eq!(stats.finalized, 1);
        assert_eq!(stats.finished_batches, 1);
        assert!(engine.contacts().is_empty());

        assert!(engine.get_queue_entry(vm.uuid).await.is_err());
        let vm = engine.get_instance(vm.uuid).await.unwrap();
        assert_eq!(vm.status, MigrationStatus::ImportComplete);
        assert_eq!(vm.status_message, "Migration finished");
        assert_eq!(
            engine.get_batch("b1").await.unwrap().status,
            BatchStatus::Finished
        );

        engine.delete_batch("b1").await.unwrap();
        engine.delete_instance(vm.uuid).await.unwrap();
    }
}
