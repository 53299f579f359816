//! Batch membership reconciliation.
//!
//! Membership is recomputed with a full scan of the batch's members and of
//! every unassigned instance, so the cost of a batch write is
//! O(instances). Instances that are migrating or disabled by a user are never
//! moved.

use ferry_id::InstanceId;
use ferry_types::{Batch, Instance, MigrationStatus};
use tracing::{debug, info};

use super::error::EngineResult;
use super::matcher::{Matcher, SourceTypes};
use crate::db::{InstanceFilter, Transaction};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub assigned: usize,
    pub unassigned: usize,
}

pub(crate) fn assign(instance: &mut Instance, batch: &str) {
    instance.batch = Some(batch.to_string());
    instance.status = MigrationStatus::AssignedToBatch;
    instance.status_message.clear();
}

pub(crate) fn unassign(instance: &mut Instance) {
    instance.batch = None;
    if !instance.is_user_disabled() {
        instance.status = MigrationStatus::NotAssigned;
    }
    instance.status_message.clear();
}

/// Delete the queue entry of a non-migrating instance, if one is left over.
pub(crate) async fn drop_leftover_entry(
    tx: &mut dyn Transaction,
    uuid: InstanceId,
) -> EngineResult<()> {
    match tx.delete_queue_entry(uuid).await {
        Ok(()) => {
            debug!(instance = %uuid, "Removed leftover queue entry");
            Ok(())
        }
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Unassign a non-migrating instance and drop the queue entry an earlier
/// failed run left behind. The caller persists the instance.
pub(crate) async fn release(
    tx: &mut dyn Transaction,
    instance: &mut Instance,
) -> EngineResult<()> {
    unassign(instance);
    drop_leftover_entry(tx, instance.uuid).await
}

/// Re-evaluate membership of `batch` after it was created or updated.
pub async fn reconcile_batch(
    tx: &mut dyn Transaction,
    batch: &Batch,
) -> EngineResult<ReconcileStats> {
    let matcher = Matcher::for_batch(batch)?;
    let sources = SourceTypes::load(tx).await?;
    let mut stats = ReconcileStats::default();

    for mut instance in tx
        .list_instances(&[InstanceFilter::in_batch(&batch.name)])
        .await?
    {
        if instance.is_user_disabled() || instance.is_migrating() {
            continue;
        }
        if !matcher.matches(&sources.snapshot(&instance))? {
            debug!(instance = %instance.uuid, batch = %batch.name, "Instance no longer matches batch");
            release(tx, &mut instance).await?;
            tx.update_instance(&instance).await?;
            stats.unassigned += 1;
        }
    }

    for mut instance in tx.list_instances(&[InstanceFilter::unassigned()]).await? {
        if instance.is_user_disabled() || instance.is_migrating() {
            continue;
        }
        if matcher.matches(&sources.snapshot(&instance))? {
            debug!(instance = %instance.uuid, batch = %batch.name, "Instance matches batch");
            assign(&mut instance, &batch.name);
            tx.update_instance(&instance).await?;
            stats.assigned += 1;
        }
    }

    if stats != ReconcileStats::default() {
        info!(
            batch = %batch.name,
            assigned = stats.assigned,
            unassigned = stats.unassigned,
            "Batch membership reconciled"
        );
    }

    Ok(stats)
}

/// Assign an unassigned instance to the first modifiable batch, by name,
/// whose include expression it satisfies. Returns the batch name, if any.
///
/// The caller persists the instance.
pub async fn assign_to_first_match(
    tx: &mut dyn Transaction,
    instance: &mut Instance,
) -> EngineResult<Option<String>> {
    if instance.batch.is_some() || instance.is_user_disabled() || instance.is_migrating() {
        return Ok(instance.batch.clone());
    }

    let sources = SourceTypes::load(tx).await?;
    let snapshot = sources.snapshot(instance);
    let batches = tx.list_batches(&[]).await?;

    for batch in batches.iter().filter(|b| b.status.can_be_modified()) {
        if Matcher::for_batch(batch)?.matches(&snapshot)? {
            assign(instance, &batch.name);
            return Ok(Some(batch.name.clone()));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use ferry_id::InstanceId;
    use ferry_types::{
        BatchStatus, InstanceProperties, QueueEntry, Source, SourceConnection, SourceType,
    };

    use super::*;
    use crate::db::{MemoryStore, Store};

    fn batch(name: &str, expr: &str) -> Batch {
        Batch {
            name: name.into(),
            target: "t".into(),
            target_project: None,
            storage_pool: None,
            include_expression: expr.into(),
            constraints: vec![],
            status: BatchStatus::Defined,
            status_message: String::new(),
        }
    }

    fn instance(name: &str, os: &str) -> Instance {
        Instance::new(
            InstanceId::new(),
            "src",
            InstanceProperties {
                name: name.into(),
                os: os.into(),
                ..Default::default()
            },
        )
    }

    async fn seeded(instances: &[Instance]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_source(&Source {
            name: "src".into(),
            source_type: SourceType::Common,
            connection: SourceConnection {
                endpoint: "https://src".into(),
                ..Default::default()
            },
        })
        .await
        .unwrap();
        for inst in instances {
            tx.create_instance(inst).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_membership_is_exactly_the_matching_set() {
        let mut disabled = instance("d1", "Ubuntu");
        disabled.status = MigrationStatus::UserDisabled;
        let all = vec![
            instance("u1", "Ubuntu"),
            instance("u2", "Ubuntu"),
            instance("w1", "Windows"),
            disabled.clone(),
        ];
        let store = seeded(&all).await;

        let b = batch("ubuntu", r#"os == "Ubuntu""#);
        let mut tx = store.begin().await.unwrap();
        tx.create_batch(&b).await.unwrap();
        let stats = reconcile_batch(tx.as_mut(), &b).await.unwrap();
        assert_eq!(stats.assigned, 2);

        let members = tx
            .list_instances(&[InstanceFilter::in_batch("ubuntu")])
            .await
            .unwrap();
        let mut names: Vec<_> = members.iter().map(|i| i.properties.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["u1", "u2"]);
        assert!(members
            .iter()
            .all(|i| i.status == MigrationStatus::AssignedToBatch));

        let d = tx.get_instance(disabled.uuid).await.unwrap();
        assert!(d.batch.is_none());
    }

    #[tokio::test]
    async fn test_changed_expression_drops_members_except_migrating() {
        let store = seeded(&[instance("u1", "Ubuntu"), instance("u2", "Ubuntu")]).await;
        let mut b = batch("ubuntu", r#"os == "Ubuntu""#);
        let mut tx = store.begin().await.unwrap();
        tx.create_batch(&b).await.unwrap();
        reconcile_batch(tx.as_mut(), &b).await.unwrap();

        let mut members = tx
            .list_instances(&[InstanceFilter::in_batch("ubuntu")])
            .await
            .unwrap();
        members[0].status = MigrationStatus::Idle;
        tx.update_instance(&members[0]).await.unwrap();

        b.include_expression = r#"os == "Windows""#.into();
        tx.update_batch(&b).await.unwrap();
        let stats = reconcile_batch(tx.as_mut(), &b).await.unwrap();
        assert_eq!(stats, ReconcileStats { assigned: 0, unassigned: 1 });

        let kept = tx
            .list_instances(&[InstanceFilter::in_batch("ubuntu")])
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].uuid, members[0].uuid);

        let dropped = tx.get_instance(members[1].uuid).await.unwrap();
        assert_eq!(dropped.status, MigrationStatus::NotAssigned);
    }

    #[tokio::test]
    async fn test_assign_to_first_match_skips_running_batches() {
        let store = seeded(&[]).await;
        let mut tx = store.begin().await.unwrap();

        let mut a = batch("a", "true");
        a.status = BatchStatus::Running;
        tx.create_batch(&a).await.unwrap();
        tx.create_batch(&batch("b", r#"name == "vm""#)).await.unwrap();

        let mut inst = instance("vm", "Ubuntu");
        let assigned = assign_to_first_match(tx.as_mut(), &mut inst).await.unwrap();
        assert_eq!(assigned.as_deref(), Some("b"));
        assert_eq!(inst.status, MigrationStatus::AssignedToBatch);
    }

    #[tokio::test]
    async fn test_dropped_member_loses_failed_queue_entry() {
        let mut failed = instance("u1", "Ubuntu");
        failed.batch = Some("ubuntu".into());
        failed.status = MigrationStatus::Error;
        let store = seeded(&[failed.clone()]).await;

        let mut b = batch("ubuntu", r#"os == "Ubuntu""#);
        b.status = BatchStatus::Error;
        let mut tx = store.begin().await.unwrap();
        tx.create_batch(&b).await.unwrap();
        let mut entry = QueueEntry::new(failed.uuid, "ubuntu");
        entry.status = MigrationStatus::Error;
        tx.create_queue_entry(&entry).await.unwrap();

        b.include_expression = "false".into();
        tx.update_batch(&b).await.unwrap();
        let stats = reconcile_batch(tx.as_mut(), &b).await.unwrap();
        assert_eq!(stats, ReconcileStats { assigned: 0, unassigned: 1 });

        let released = tx.get_instance(failed.uuid).await.unwrap();
        assert_eq!(released.batch, None);
        assert_eq!(released.status, MigrationStatus::NotAssigned);
        assert!(tx
            .get_queue_entry(failed.uuid)
            .await
            .is_err_and(|e| e.is_not_found()));
    }
}
