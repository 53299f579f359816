//! Sources and instances.

use ferry_id::InstanceId;
use ferry_types::{Instance, InstanceOverrides, MigrationStatus, Source};
use tracing::{debug, info, instrument};

use super::error::{EngineError, EngineResult};
use super::matcher::{Matcher, SourceTypes};
use super::reconciler::{self, assign_to_first_match, drop_leftover_entry};
use super::Engine;
use crate::db::{DbError, InstanceFilter};

fn ensure_not_migrating(instance: &Instance, action: &str) -> EngineResult<()> {
    if instance.is_migrating() {
        return Err(EngineError::not_permitted(format!(
            "cannot {action} instance '{}' while it is migrating ({})",
            instance.uuid, instance.status
        )));
    }
    Ok(())
}

impl Engine {
    #[instrument(skip(self, source), fields(source = %source.name))]
    pub async fn create_source(&self, source: Source) -> EngineResult<Source> {
        source.validate()?;

        let mut tx = self.begin().await?;
        tx.create_source(&source).await?;
        tx.commit().await?;

        info!(source = %source.name, source_type = %source.source_type, "Created source");
        Ok(source)
    }

    pub async fn list_sources(&self) -> EngineResult<Vec<Source>> {
        let mut tx = self.begin().await?;
        Ok(tx.list_sources().await?)
    }

    /// Record a discovered instance and match it against the batches.
    #[instrument(skip(self, instance), fields(instance = %instance.uuid))]
    pub async fn create_instance(&self, mut instance: Instance) -> EngineResult<Instance> {
        instance.validate()?;
        instance.batch = None;
        instance.status = MigrationStatus::NotAssigned;
        instance.status_message.clear();

        let mut tx = self.begin().await?;
        match tx.get_source(&instance.source).await {
            Ok(_) => {}
            Err(DbError::NotFound { .. }) => {
                return Err(EngineError::not_found("source", &instance.source));
            }
            Err(err) => return Err(err.into()),
        }

        tx.create_instance(&instance).await?;
        if assign_to_first_match(tx.as_mut(), &mut instance).await?.is_some() {
            tx.update_instance(&instance).await?;
        }
        tx.commit().await?;

        info!(
            instance = %instance.uuid,
            name = %instance.properties.name,
            batch = ?instance.batch,
            "Created instance"
        );
        Ok(instance)
    }

    pub async fn get_instance(&self, uuid: InstanceId) -> EngineResult<Instance> {
        let mut tx = self.begin().await?;
        Ok(tx.get_instance(uuid).await?)
    }

    pub async fn list_instances(&self, filter: InstanceFilter) -> EngineResult<Vec<Instance>> {
        let mut tx = self.begin().await?;
        Ok(tx.list_instances(&[filter]).await?)
    }

    /// Replace the user overrides of an instance and re-run assignment.
    #[instrument(skip(self, overrides))]
    pub async fn update_overrides(
        &self,
        uuid: InstanceId,
        overrides: InstanceOverrides,
    ) -> EngineResult<Instance> {
        overrides.validate()?;

        let mut tx = self.begin().await?;
        let mut instance = tx.get_instance(uuid).await?;
        ensure_not_migrating(&instance, "modify")?;

        instance.overrides = overrides;

        if let Some(name) = instance.batch.clone() {
            let batch = tx.get_batch(&name).await?;
            if !batch.status.can_be_modified() {
                return Err(EngineError::not_permitted(format!(
                    "instance '{uuid}' belongs to batch '{name}' which is {}",
                    batch.status
                )));
            }

            let sources = SourceTypes::load(tx.as_mut()).await?;
            if !Matcher::for_batch(&batch)?.matches(&sources.snapshot(&instance))? {
                reconciler::release(tx.as_mut(), &mut instance).await?;
            }
        }
        assign_to_first_match(tx.as_mut(), &mut instance).await?;

        tx.update_instance(&instance).await?;
        tx.commit().await?;

        info!(instance = %uuid, batch = ?instance.batch, "Updated instance overrides");
        Ok(instance)
    }

    /// Exclude an instance from every batch until it is enabled again.
    #[instrument(skip(self))]
    pub async fn disable_instance(&self, uuid: InstanceId) -> EngineResult<Instance> {
        let mut tx = self.begin().await?;
        let mut instance = tx.get_instance(uuid).await?;
        ensure_not_migrating(&instance, "disable")?;

        instance.batch = None;
        instance.status = MigrationStatus::UserDisabled;
        instance.status_message.clear();
        tx.update_instance(&instance).await?;
        drop_leftover_entry(tx.as_mut(), uuid).await?;
        tx.commit().await?;

        info!(instance = %uuid, "Disabled instance");
        Ok(instance)
    }

    /// Re-enable a disabled instance and match it against the batches.
    #[instrument(skip(self))]
    pub async fn enable_instance(&self, uuid: InstanceId) -> EngineResult<Instance> {
        let mut tx = self.begin().await?;
        let mut instance = tx.get_instance(uuid).await?;
        if !instance.is_user_disabled() {
            return Ok(instance);
        }

        instance.status = MigrationStatus::NotAssigned;
        assign_to_first_match(tx.as_mut(), &mut instance).await?;
        tx.update_instance(&instance).await?;
        tx.commit().await?;

        info!(instance = %uuid, batch = ?instance.batch, "Enabled instance");
        Ok(instance)
    }

    /// Delete an instance. Deleting a missing instance succeeds.
    #[instrument(skip(self))]
    pub async fn delete_instance(&self, uuid: InstanceId) -> EngineResult<()> {
        let mut tx = self.begin().await?;
        let instance = match tx.get_instance(uuid).await {
            Ok(instance) => instance,
            Err(DbError::NotFound { .. }) => {
                debug!(instance = %uuid, "Instance already deleted");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let finished = instance.status == MigrationStatus::ImportComplete
            && tx.get_queue_entry(uuid).await.is_err_and(|e| e.is_not_found());
        if !finished {
            ensure_not_migrating(&instance, "delete")?;
        }

        drop_leftover_entry(tx.as_mut(), uuid).await?;
        tx.delete_instance(uuid).await?;
        tx.commit().await?;

        self.contacts.forget(uuid);
        info!(instance = %uuid, "Deleted instance");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{batch, engine, engine_with, instance};
    use crate::engine::MockProvisioner;

    #[tokio::test]
    async fn test_instance_needs_known_source() {
        let (engine, _) = engine().await;
        let mut vm = instance("web1");
        vm.source = "missing".into();
        let err = engine.create_instance(vm).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "source", .. }));
    }

    #[tokio::test]
    async fn test_new_instance_joins_first_batch_by_name() {
        let (engine, _) = engine().await;
        engine.create_batch(batch("b", "true")).await.unwrap();
        engine.create_batch(batch("a", "true")).await.unwrap();

        let vm = engine.create_instance(instance("web1")).await.unwrap();
        assert_eq!(vm.batch.as_deref(), Some("a"));
        assert_eq!(vm.status, MigrationStatus::AssignedToBatch);
    }

    #[tokio::test]
    async fn test_overrides_move_instance_between_batches() {
        let (engine, _) = engine().await;
        engine
            .create_batch(batch("ubuntu", r#"os == "Ubuntu""#))
            .await
            .unwrap();
        engine
            .create_batch(batch("debian", r#"os == "Debian""#))
            .await
            .unwrap();
        let vm = engine.create_instance(instance("web1")).await.unwrap();
        assert_eq!(vm.batch.as_deref(), Some("ubuntu"));

        let vm = engine
            .update_overrides(
                vm.uuid,
                InstanceOverrides {
                    os: Some("Debian".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(vm.batch.as_deref(), Some("debian"));
    }

    #[tokio::test]
    async fn test_overrides_release_failed_instance_entry() {
        let (engine, _) = engine_with(MockProvisioner::failing()).await;
        engine
            .create_batch(batch("ubuntu", r#"os == "Ubuntu""#))
            .await
            .unwrap();
        let vm = engine.create_instance(instance("web1")).await.unwrap();
        engine.start_batch("ubuntu").await.unwrap();
        engine.advance().await.unwrap();
        assert_eq!(
            engine.get_instance(vm.uuid).await.unwrap().status,
            MigrationStatus::Error
        );

        engine
            .create_batch(batch("debian", r#"os == "Debian""#))
            .await
            .unwrap();
        let vm = engine
            .update_overrides(
                vm.uuid,
                InstanceOverrides {
                    os: Some("Debian".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(vm.batch.as_deref(), Some("debian"));
        assert!(engine.get_queue_entry(vm.uuid).await.is_err());

        engine.start_batch("debian").await.unwrap();
        let entry = engine.get_queue_entry(vm.uuid).await.unwrap().entry;
        assert_eq!(entry.batch, "debian");
        assert_eq!(entry.status, MigrationStatus::Creating);
    }

    #[tokio::test]
    async fn test_migrating_instance_is_pinned() {
        let (engine, _) = engine().await;
        let vm = engine.create_instance(instance("web1")).await.unwrap();
        engine.create_batch(batch("b1", "true")).await.unwrap();
        engine.start_batch("b1").await.unwrap();

        let err = engine
            .update_overrides(vm.uuid, InstanceOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotPermitted(_)));
        assert!(engine.disable_instance(vm.uuid).await.is_err());
        assert!(engine.delete_instance(vm.uuid).await.is_err());
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let (engine, _) = engine().await;
        engine.create_batch(batch("b1", "true")).await.unwrap();
        let vm = engine.create_instance(instance("web1")).await.unwrap();

        let vm = engine.disable_instance(vm.uuid).await.unwrap();
        assert_eq!(vm.status, MigrationStatus::UserDisabled);
        assert!(vm.batch.is_none());

        engine
            .update_batch("b1", batch("b1", r#"name == "web1""#))
            .await
            .unwrap();
        assert!(engine.batch_instances("b1").await.unwrap().is_empty());

        let vm = engine.enable_instance(vm.uuid).await.unwrap();
        assert_eq!(vm.status, MigrationStatus::AssignedToBatch);
        assert_eq!(vm.batch.as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (engine, _) = engine().await;
        let vm = engine.create_instance(instance("web1")).await.unwrap();
        engine.delete_instance(vm.uuid).await.unwrap();
        engine.delete_instance(vm.uuid).await.unwrap();
        assert!(matches!(
            engine.get_instance(vm.uuid).await.unwrap_err(),
            EngineError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_list_instances_by_batch() {
        let (engine, _) = engine().await;
        engine
            .create_batch(batch("b1", r#"name == "web1""#))
            .await
            .unwrap();
        engine.create_instance(instance("web1")).await.unwrap();
        engine.create_instance(instance("web2")).await.unwrap();

        let all = engine
            .list_instances(InstanceFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        let members = engine
            .list_instances(InstanceFilter::in_batch("b1"))
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
        let unassigned = engine
            .list_instances(InstanceFilter::unassigned())
            .await
            .unwrap();
        assert_eq!(unassigned[0].properties.name, "web2");
    }
}
