//! Worker commands and status reports.
//!
//! Workers poll for a command while their instance is `Idle` and report the
//! outcome of the command they run. Every call presents the queue entry's
//! secret.
//!
//! Decision order for an idle instance:
//!
//! 1. batch not running: `Idle`
//! 2. disks need importing and the source supports background import:
//!    `ImportDisks`, status `BackgroundImport`
//! 3. earliest fitting window has started and no matching constraint is at
//!    its concurrency limit: `FinalizeImport`, status `FinalImport`
//! 4. otherwise: `Idle`

use chrono::{DateTime, Duration, Utc};
use ferry_id::{InstanceId, WorkerSecret};
use ferry_types::{
    get_earliest, Batch, Instance, MigrationStatus, QueueEntry, WorkerCommand, WorkerCommandKind,
    WorkerResponse, WorkerResponseKind,
};
use tracing::{debug, info, instrument, warn};

use super::error::{EngineError, EngineResult};
use super::matcher::{Matcher, SourceTypes};
use super::Engine;
use crate::db::{QueueFilter, Transaction};

/// Outcome of the scheduling decision for an idle instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Idle(String),
    ImportDisks,
    FinalizeImport { window: Option<String> },
}

/// Decide the next command for an idle entry.
pub(crate) async fn decide(
    tx: &mut dyn Transaction,
    entry: &QueueEntry,
    instance: &Instance,
    batch: &Batch,
    now: DateTime<Utc>,
) -> EngineResult<Decision> {
    if batch.status != ferry_types::BatchStatus::Running {
        return Ok(Decision::Idle(format!("Batch '{}' is not running", batch.name)));
    }

    if entry.needs_disk_import && instance.effective_properties().background_import {
        return Ok(Decision::ImportDisks);
    }

    let sources = SourceTypes::load(tx).await?;
    let snapshot = sources.snapshot(instance);

    let mut constraints = Vec::new();
    for constraint in &batch.constraints {
        let matcher = Matcher::for_constraint(&batch.name, constraint)?;
        if matcher.matches(&snapshot)? {
            constraints.push((constraint, matcher));
        }
    }

    let min_duration = constraints
        .iter()
        .map(|(c, _)| c.min_instance_boot_time())
        .max()
        .unwrap_or_else(Duration::zero);

    let others: Vec<QueueEntry> = tx
        .list_queue_entries(&[QueueFilter::in_batch(&batch.name)])
        .await?
        .into_iter()
        .filter(|e| e.instance != entry.instance)
        .collect();

    let windows = tx.list_windows(&batch.name).await?;
    let open: Vec<_> = windows
        .iter()
        .filter(|w| {
            let used = others
                .iter()
                .filter(|e| e.window.as_deref() == Some(w.name.as_str()))
                .count();
            !w.is_full(used)
        })
        .cloned()
        .collect();
    if !windows.is_empty() && open.is_empty() {
        return Ok(Decision::Idle("All migration windows are full".to_string()));
    }

    let window = match get_earliest(&open, min_duration, now) {
        Ok(window) => window,
        Err(err) => return Ok(Decision::Idle(format!("Waiting for a migration window: {err}"))),
    };
    if !window.has_started(now) {
        return Ok(Decision::Idle(format!(
            "Waiting for migration window '{}' to start",
            window.name
        )));
    }

    let limited: Vec<_> = constraints
        .iter()
        .filter(|(c, _)| c.max_concurrent_instances > 0)
        .collect();

    let mut finalizing = Vec::new();
    if !limited.is_empty() {
        for other in others
            .iter()
            .filter(|e| e.status == MigrationStatus::FinalImport)
        {
            finalizing.push(sources.snapshot(&tx.get_instance(other.instance).await?));
        }
    }

    for (constraint, matcher) in limited {
        let mut running = 0;
        for snapshot in &finalizing {
            if matcher.matches(snapshot)? {
                running += 1;
            }
        }
        if running >= constraint.max_concurrent_instances {
            return Ok(Decision::Idle(format!(
                "Constraint '{}' allows {} concurrent final imports",
                constraint.name, constraint.max_concurrent_instances
            )));
        }
    }

    let window = (!window.name.is_empty()).then_some(window.name);
    Ok(Decision::FinalizeImport { window })
}

/// Persist the same status on the entry and its instance.
async fn set_status(
    tx: &mut dyn Transaction,
    entry: &mut QueueEntry,
    instance: &mut Instance,
    status: MigrationStatus,
    message: &str,
) -> EngineResult<()> {
    entry.status = status;
    entry.status_message = message.to_string();
    instance.status = status;
    instance.status_message = message.to_string();
    instance.needs_disk_import = entry.needs_disk_import;

    tx.update_queue_entry(entry).await?;
    tx.update_instance(instance).await?;
    Ok(())
}

impl Engine {
    async fn worker_entry(
        &self,
        tx: &mut dyn Transaction,
        uuid: InstanceId,
        secret: WorkerSecret,
    ) -> EngineResult<QueueEntry> {
        let entry = tx.get_queue_entry(uuid).await?;
        if entry.secret != secret {
            warn!(instance = %uuid, "Worker presented an invalid secret");
            return Err(EngineError::InvalidSecret(uuid));
        }
        self.contacts.record(uuid, Utc::now());
        Ok(entry)
    }

    /// Next command for the worker of `uuid`.
    #[instrument(skip(self, secret))]
    pub async fn new_worker_command(
        &self,
        uuid: InstanceId,
        secret: WorkerSecret,
    ) -> EngineResult<WorkerCommand> {
        let mut tx = self.begin().await?;
        let mut entry = self.worker_entry(tx.as_mut(), uuid, secret).await?;
        let mut instance = tx.get_instance(uuid).await?;
        let source = tx.get_source(&instance.source).await?;
        let batch = tx.get_batch(&entry.batch).await?;

        if entry.status != MigrationStatus::Idle {
            return Err(EngineError::not_permitted(format!(
                "instance '{uuid}' is not idle (status {})",
                entry.status
            )));
        }

        let command = match decide(tx.as_mut(), &entry, &instance, &batch, Utc::now()).await? {
            Decision::Idle(reason) => {
                debug!(instance = %uuid, reason = %reason, "Worker stays idle");
                WorkerCommandKind::Idle
            }
            Decision::ImportDisks => {
                set_status(
                    tx.as_mut(),
                    &mut entry,
                    &mut instance,
                    MigrationStatus::BackgroundImport,
                    "Importing disks",
                )
                .await?;
                WorkerCommandKind::ImportDisks
            }
            Decision::FinalizeImport { window } => {
                entry.window = window;
                set_status(
                    tx.as_mut(),
                    &mut entry,
                    &mut instance,
                    MigrationStatus::FinalImport,
                    "Performing final import",
                )
                .await?;
                WorkerCommandKind::FinalizeImport
            }
        };

        tx.commit().await?;

        if command != WorkerCommandKind::Idle {
            info!(
                instance = %uuid,
                batch = %batch.name,
                command = ?command,
                window = ?entry.window,
                "Dispatched worker command"
            );
        }

        let props = instance.effective_properties();
        Ok(WorkerCommand {
            command,
            location: props.location,
            source_type: source.source_type,
            source_connection: source.connection,
            os: props.os,
            os_version: props.os_version,
        })
    }

    /// Apply a worker's status report.
    #[instrument(skip(self, secret, response), fields(status = ?response.status))]
    pub async fn process_worker_update(
        &self,
        uuid: InstanceId,
        secret: WorkerSecret,
        response: WorkerResponse,
    ) -> EngineResult<QueueEntry> {
        let mut tx = self.begin().await?;
        let mut entry = self.worker_entry(tx.as_mut(), uuid, secret).await?;
        if !entry.is_migrating() {
            return Err(EngineError::not_found("migrating queue entry", uuid));
        }
        let mut instance = tx.get_instance(uuid).await?;

        let next = entry.status.after_worker_response(response.status);
        if response.status == WorkerResponseKind::Success
            && entry.status == MigrationStatus::BackgroundImport
        {
            entry.needs_disk_import = false;
        }
        let status = next.unwrap_or(entry.status);
        set_status(
            tx.as_mut(),
            &mut entry,
            &mut instance,
            status,
            &response.status_message,
        )
        .await?;

        tx.commit().await?;

        match response.status {
            WorkerResponseKind::Failed => warn!(
                instance = %uuid,
                message = %response.status_message,
                "Worker reported failure"
            ),
            _ if next.is_some() => info!(instance = %uuid, status = %status, "Migration advanced"),
            _ => debug!(instance = %uuid, "Worker progress"),
        }

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use ferry_types::{Constraint, Window};

    use super::*;
    use crate::engine::testing::{batch, engine, instance};

    fn open_window(name: &str, capacity: i64) -> Window {
        let now = Utc::now();
        Window {
            name: name.into(),
            start: Some(now - Duration::minutes(1)),
            end: Some(now + Duration::hours(1)),
            capacity,
            ..Default::default()
        }
    }

    fn response(status: WorkerResponseKind) -> WorkerResponse {
        WorkerResponse {
            status,
            status_message: format!("{status:?}"),
        }
    }

    /// Start `b1` over `vms` and provision them; returns their secrets.
    async fn started(
        engine: &Engine,
        provisioner: &crate::engine::MockProvisioner,
        b: Batch,
        windows: Vec<Window>,
        vms: &[Instance],
    ) -> Vec<WorkerSecret> {
        for vm in vms {
            engine.create_instance(vm.clone()).await.unwrap();
        }
        engine.create_batch(b).await.unwrap();
        if !windows.is_empty() {
            engine.replace_windows("b1", windows).await.unwrap();
        }
        engine.start_batch("b1").await.unwrap();
        engine.advance().await.unwrap();
        vms.iter()
            .map(|vm| provisioner.secret_for(vm.uuid).unwrap())
            .collect()
    }

    fn foreground(name: &str) -> Instance {
        let mut vm = instance(name);
        vm.properties.background_import = false;
        vm
    }

    #[tokio::test]
    async fn test_background_import_then_idle_until_window_starts() {
        let (engine, provisioner) = engine().await;
        let vm = instance("web1");
        let now = Utc::now();
        let later = Window {
            name: "w1".into(),
            start: Some(now + Duration::hours(1)),
            end: Some(now + Duration::hours(2)),
            ..Default::default()
        };
        let secrets = started(
            &engine,
            &provisioner,
            batch("b1", r#"name == "web1""#),
            vec![later],
            std::slice::from_ref(&vm),
        )
        .await;

        let cmd = engine.new_worker_command(vm.uuid, secrets[0]).await.unwrap();
        assert_eq!(cmd.command, WorkerCommandKind::ImportDisks);
        assert_eq!(cmd.location, "/dc1/vm/web1");
        assert_eq!(cmd.source_type, ferry_types::SourceType::Vmware);

        let err = engine.new_worker_command(vm.uuid, secrets[0]).await.unwrap_err();
        assert!(matches!(err, EngineError::NotPermitted(_)));

        let entry = engine
            .process_worker_update(vm.uuid, secrets[0], response(WorkerResponseKind::Success))
            .await
            .unwrap();
        assert_eq!(entry.status, MigrationStatus::Idle);
        assert!(!entry.needs_disk_import);

        let cmd = engine.new_worker_command(vm.uuid, secrets[0]).await.unwrap();
        assert_eq!(cmd.command, WorkerCommandKind::Idle);
        let vm = engine.get_instance(vm.uuid).await.unwrap();
        assert_eq!(vm.status, MigrationStatus::Idle);
        assert!(!vm.needs_disk_import);
    }

    #[tokio::test]
    async fn test_full_migration_without_windows() {
        let (engine, provisioner) = engine().await;
        let vm = foreground("web1");
        let secrets = started(
            &engine,
            &provisioner,
            batch("b1", "true"),
            vec![],
            std::slice::from_ref(&vm),
        )
        .await;

        let cmd = engine.new_worker_command(vm.uuid, secrets[0]).await.unwrap();
        assert_eq!(cmd.command, WorkerCommandKind::FinalizeImport);

        let entry = engine
            .process_worker_update(vm.uuid, secrets[0], response(WorkerResponseKind::Running))
            .await
            .unwrap();
        assert_eq!(entry.status, MigrationStatus::FinalImport);
        assert_eq!(entry.status_message, "Running");

        let entry = engine
            .process_worker_update(vm.uuid, secrets[0], response(WorkerResponseKind::Success))
            .await
            .unwrap();
        assert_eq!(entry.status, MigrationStatus::ImportComplete);
        assert!(entry.window.is_none());
    }

    #[tokio::test]
    async fn test_invalid_secret_is_rejected() {
        let (engine, provisioner) = engine().await;
        let vm = instance("web1");
        started(
            &engine,
            &provisioner,
            batch("b1", "true"),
            vec![],
            std::slice::from_ref(&vm),
        )
        .await;

        let err = engine
            .new_worker_command(vm.uuid, WorkerSecret::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSecret(id) if id == vm.uuid));
        assert!(engine.contacts().last_contact(vm.uuid).is_none());

        let unknown = InstanceId::new();
        let err = engine
            .new_worker_command(unknown, WorkerSecret::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert!(engine.contacts().last_contact(unknown).is_none());
        assert!(engine.contacts().is_empty());

        let secret = provisioner.secret_for(vm.uuid).unwrap();
        engine.new_worker_command(vm.uuid, secret).await.unwrap();
        assert!(engine.contacts().last_contact(vm.uuid).is_some());
    }

    #[tokio::test]
    async fn test_failed_lands_in_error_and_further_updates_are_not_found() {
        let (engine, provisioner) = engine().await;
        let vm = instance("web1");
        let secrets = started(
            &engine,
            &provisioner,
            batch("b1", "true"),
            vec![],
            std::slice::from_ref(&vm),
        )
        .await;

        let entry = engine
            .process_worker_update(
                vm.uuid,
                secrets[0],
                WorkerResponse {
                    status: WorkerResponseKind::Failed,
                    status_message: "disk read error".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(entry.status, MigrationStatus::Error);
        assert_eq!(
            engine.get_instance(vm.uuid).await.unwrap().status_message,
            "disk read error"
        );

        let err = engine
            .process_worker_update(vm.uuid, secrets[0], response(WorkerResponseKind::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_stopped_batch_idles_workers() {
        let (engine, provisioner) = engine().await;
        let vm = instance("web1");
        let secrets = started(
            &engine,
            &provisioner,
            batch("b1", "true"),
            vec![],
            std::slice::from_ref(&vm),
        )
        .await;
        engine.stop_batch("b1").await.unwrap();

        let cmd = engine.new_worker_command(vm.uuid, secrets[0]).await.unwrap();
        assert_eq!(cmd.command, WorkerCommandKind::Idle);
        let entry = engine.get_queue_entry(vm.uuid).await.unwrap().entry;
        assert_eq!(entry.status, MigrationStatus::Idle);
    }

    #[tokio::test]
    async fn test_concurrency_constraint_limits_final_imports() {
        let (engine, provisioner) = engine().await;
        let vms = [foreground("web1"), foreground("web2")];
        let mut b = batch("b1", "true");
        b.constraints.push(Constraint {
            name: "web".into(),
            include_expression: r#"path_dir(location) == "/dc1/vm""#.into(),
            max_concurrent_instances: 1,
            min_instance_boot_time_secs: 0,
        });
        let secrets = started(&engine, &provisioner, b, vec![], &vms).await;

        let first = engine.new_worker_command(vms[0].uuid, secrets[0]).await.unwrap();
        let second = engine.new_worker_command(vms[1].uuid, secrets[1]).await.unwrap();
        assert_eq!(first.command, WorkerCommandKind::FinalizeImport);
        assert_eq!(second.command, WorkerCommandKind::Idle);

        engine
            .process_worker_update(vms[0].uuid, secrets[0], response(WorkerResponseKind::Success))
            .await
            .unwrap();
        let second = engine.new_worker_command(vms[1].uuid, secrets[1]).await.unwrap();
        assert_eq!(second.command, WorkerCommandKind::FinalizeImport);
    }

    #[tokio::test]
    async fn test_each_limited_constraint_counts_its_own_matches() {
        let (engine, provisioner) = engine().await;
        let vms = [
            foreground("web1"),
            foreground("web2"),
            foreground("db1"),
            foreground("db2"),
        ];
        let mut b = batch("b1", "true");
        b.constraints.push(Constraint {
            name: "web".into(),
            include_expression: r#"name startsWith "web""#.into(),
            max_concurrent_instances: 1,
            min_instance_boot_time_secs: 0,
        });
        b.constraints.push(Constraint {
            name: "all".into(),
            include_expression: "true".into(),
            max_concurrent_instances: 2,
            min_instance_boot_time_secs: 0,
        });
        let secrets = started(&engine, &provisioner, b, vec![], &vms).await;

        let mut commands = Vec::new();
        for (vm, secret) in vms.iter().zip(&secrets) {
            let cmd = engine.new_worker_command(vm.uuid, *secret).await.unwrap();
            commands.push(cmd.command);
        }
        assert_eq!(
            commands,
            vec![
                WorkerCommandKind::FinalizeImport,
                WorkerCommandKind::Idle,
                WorkerCommandKind::FinalizeImport,
                WorkerCommandKind::Idle,
            ]
        );
    }

    #[tokio::test]
    async fn test_full_window_is_skipped() {
        let (engine, provisioner) = engine().await;
        let vms = [foreground("web1"), foreground("web2")];
        let secrets = started(
            &engine,
            &provisioner,
            batch("b1", "true"),
            vec![open_window("w1", 1)],
            &vms,
        )
        .await;

        let first = engine.new_worker_command(vms[0].uuid, secrets[0]).await.unwrap();
        assert_eq!(first.command, WorkerCommandKind::FinalizeImport);
        let entry = engine.get_queue_entry(vms[0].uuid).await.unwrap().entry;
        assert_eq!(entry.window.as_deref(), Some("w1"));

        let second = engine.new_worker_command(vms[1].uuid, secrets[1]).await.unwrap();
        assert_eq!(second.command, WorkerCommandKind::Idle);
    }

    #[tokio::test]
    async fn test_min_boot_time_must_fit_window() {
        let (engine, provisioner) = engine().await;
        let vm = foreground("web1");
        let mut b = batch("b1", "true");
        b.constraints.push(Constraint {
            name: "slow".into(),
            include_expression: "true".into(),
            max_concurrent_instances: 0,
            min_instance_boot_time_secs: 2 * 3600,
        });
        let secrets = started(
            &engine,
            &provisioner,
            b,
            vec![open_window("w1", 0)],
            std::slice::from_ref(&vm),
        )
        .await;

        let cmd = engine.new_worker_command(vm.uuid, secrets[0]).await.unwrap();
        assert_eq!(cmd.command, WorkerCommandKind::Idle);
    }
}
