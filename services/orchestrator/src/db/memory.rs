//! Process-local store.
//!
//! A transaction takes an owned lock on all tables and works on a private
//! copy, which replaces the shared tables on commit. Transactions are
//! therefore fully serialized. Referential checks mirror the foreign keys of
//! the Postgres schema so both stores fail the same way.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ferry_id::InstanceId;
use ferry_types::{Batch, Instance, QueueEntry, Source, Window};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::repo::{any_match, BatchFilter, InstanceFilter, QueueFilter, Store, Transaction};
use super::DbError;

#[derive(Debug, Clone, Default)]
struct Tables {
    sources: BTreeMap<String, Source>,
    batches: BTreeMap<String, Batch>,
    instances: BTreeMap<InstanceId, Instance>,
    /// Keyed by (batch, window name).
    windows: BTreeMap<(String, String), Window>,
    queue: BTreeMap<InstanceId, QueueEntry>,
}

/// In-memory [`Store`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, work }))
    }

    async fn health_check(&self) -> Result<(), DbError> {
        Ok(())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

impl MemoryTransaction {
    fn require_batch(&self, entity: &'static str, key: &str, batch: &str) -> Result<(), DbError> {
        if self.work.batches.contains_key(batch) {
            Ok(())
        } else {
            Err(DbError::foreign_key(
                entity,
                key,
                format!("batch '{batch}' does not exist"),
            ))
        }
    }

    fn require_window(
        &self,
        entity: &'static str,
        key: &str,
        batch: &str,
        window: Option<&String>,
    ) -> Result<(), DbError> {
        match window {
            Some(name) if !self.work.windows.contains_key(&(batch.to_string(), name.clone())) => {
                Err(DbError::foreign_key(
                    entity,
                    key,
                    format!("window '{name}' of batch '{batch}' does not exist"),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn create_source(&mut self, source: &Source) -> Result<(), DbError> {
        if self.work.sources.contains_key(&source.name) {
            return Err(DbError::conflict("source", &source.name));
        }
        self.work
            .sources
            .insert(source.name.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&mut self, name: &str) -> Result<Source, DbError> {
        self.work
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::not_found("source", name))
    }

    async fn list_sources(&mut self) -> Result<Vec<Source>, DbError> {
        Ok(self.work.sources.values().cloned().collect())
    }

    async fn create_batch(&mut self, batch: &Batch) -> Result<(), DbError> {
        if self.work.batches.contains_key(&batch.name) {
            return Err(DbError::conflict("batch", &batch.name));
        }
        self.work.batches.insert(batch.name.clone(), batch.clone());
        Ok(())
    }

    async fn get_batch(&mut self, name: &str) -> Result<Batch, DbError> {
        self.work
            .batches
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::not_found("batch", name))
    }

    async fn list_batches(&mut self, filters: &[BatchFilter]) -> Result<Vec<Batch>, DbError> {
        Ok(self
            .work
            .batches
            .values()
            .filter(|b| any_match(filters, |f| f.matches(b)))
            .cloned()
            .collect())
    }

    async fn update_batch(&mut self, batch: &Batch) -> Result<(), DbError> {
        let slot = self
            .work
            .batches
            .get_mut(&batch.name)
            .ok_or_else(|| DbError::not_found("batch", &batch.name))?;
        *slot = batch.clone();
        Ok(())
    }

    async fn delete_batch(&mut self, name: &str) -> Result<(), DbError> {
        if !self.work.batches.contains_key(name) {
            return Err(DbError::not_found("batch", name));
        }
        let referenced = self
            .work
            .instances
            .values()
            .any(|i| i.batch.as_deref() == Some(name))
            || self.work.windows.keys().any(|(batch, _)| batch == name)
            || self.work.queue.values().any(|q| q.batch == name);
        if referenced {
            return Err(DbError::foreign_key(
                "batch",
                name,
                "batch is still referenced",
            ));
        }
        self.work.batches.remove(name);
        Ok(())
    }

    async fn create_instance(&mut self, instance: &Instance) -> Result<(), DbError> {
        let key = instance.uuid.to_string();
        if self.work.instances.contains_key(&instance.uuid) {
            return Err(DbError::conflict("instance", key));
        }
        if !self.work.sources.contains_key(&instance.source) {
            return Err(DbError::foreign_key(
                "instance",
                key,
                format!("source '{}' does not exist", instance.source),
            ));
        }
        if let Some(batch) = &instance.batch {
            self.require_batch("instance", &key, batch)?;
        }
        self.work.instances.insert(instance.uuid, instance.clone());
        Ok(())
    }

    async fn get_instance(&mut self, uuid: InstanceId) -> Result<Instance, DbError> {
        self.work
            .instances
            .get(&uuid)
            .cloned()
            .ok_or_else(|| DbError::not_found("instance", uuid))
    }

    async fn list_instances(
        &mut self,
        filters: &[InstanceFilter],
    ) -> Result<Vec<Instance>, DbError> {
        Ok(self
            .work
            .instances
            .values()
            .filter(|i| any_match(filters, |f| f.matches(i)))
            .cloned()
            .collect())
    }

    async fn update_instance(&mut self, instance: &Instance) -> Result<(), DbError> {
        let key = instance.uuid.to_string();
        if !self.work.instances.contains_key(&instance.uuid) {
            return Err(DbError::not_found("instance", key));
        }
        if let Some(batch) = &instance.batch {
            self.require_batch("instance", &key, batch)?;
        }
        self.work.instances.insert(instance.uuid, instance.clone());
        Ok(())
    }

    async fn delete_instance(&mut self, uuid: InstanceId) -> Result<(), DbError> {
        if !self.work.instances.contains_key(&uuid) {
            return Err(DbError::not_found("instance", uuid));
        }
        if self.work.queue.contains_key(&uuid) {
            return Err(DbError::foreign_key(
                "instance",
                uuid,
                "instance has a queue entry",
            ));
        }
        self.work.instances.remove(&uuid);
        Ok(())
    }

    async fn create_window(&mut self, window: &Window) -> Result<(), DbError> {
        let key = (window.batch.clone(), window.name.clone());
        if self.work.windows.contains_key(&key) {
            return Err(DbError::conflict("window", &window.name));
        }
        self.require_batch("window", &window.name, &window.batch)?;
        self.work.windows.insert(key, window.clone());
        Ok(())
    }

    async fn list_windows(&mut self, batch: &str) -> Result<Vec<Window>, DbError> {
        let mut windows: Vec<Window> = self
            .work
            .windows
            .values()
            .filter(|w| w.batch == batch)
            .cloned()
            .collect();
        windows.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.name.cmp(&b.name)));
        Ok(windows)
    }

    async fn update_window(&mut self, window: &Window) -> Result<(), DbError> {
        let key = (window.batch.clone(), window.name.clone());
        let slot = self
            .work
            .windows
            .get_mut(&key)
            .ok_or_else(|| DbError::not_found("window", &window.name))?;
        *slot = window.clone();
        Ok(())
    }

    async fn delete_window(&mut self, batch: &str, name: &str) -> Result<(), DbError> {
        let key = (batch.to_string(), name.to_string());
        if !self.work.windows.contains_key(&key) {
            return Err(DbError::not_found("window", name));
        }
        let in_use = self
            .work
            .queue
            .values()
            .any(|q| q.batch == batch && q.window.as_deref() == Some(name));
        if in_use {
            return Err(DbError::foreign_key(
                "window",
                name,
                "window is referenced by a queue entry",
            ));
        }
        self.work.windows.remove(&key);
        Ok(())
    }

    async fn create_queue_entry(&mut self, entry: &QueueEntry) -> Result<(), DbError> {
        let key = entry.instance.to_string();
        if self.work.queue.contains_key(&entry.instance) {
            return Err(DbError::conflict("queue entry", key));
        }
        if !self.work.instances.contains_key(&entry.instance) {
            return Err(DbError::foreign_key(
                "queue entry",
                key,
                "instance does not exist",
            ));
        }
        self.require_batch("queue entry", &key, &entry.batch)?;
        self.require_window("queue entry", &key, &entry.batch, entry.window.as_ref())?;
        self.work.queue.insert(entry.instance, entry.clone());
        Ok(())
    }

    async fn get_queue_entry(&mut self, instance: InstanceId) -> Result<QueueEntry, DbError> {
        self.work
            .queue
            .get(&instance)
            .cloned()
            .ok_or_else(|| DbError::not_found("queue entry", instance))
    }

    async fn list_queue_entries(
        &mut self,
        filters: &[QueueFilter],
    ) -> Result<Vec<QueueEntry>, DbError> {
        Ok(self
            .work
            .queue
            .values()
            .filter(|q| any_match(filters, |f| f.matches(q)))
            .cloned()
            .collect())
    }

    async fn update_queue_entry(&mut self, entry: &QueueEntry) -> Result<(), DbError> {
        let key = entry.instance.to_string();
        if !self.work.queue.contains_key(&entry.instance) {
            return Err(DbError::not_found("queue entry", key));
        }
        self.require_window("queue entry", &key, &entry.batch, entry.window.as_ref())?;
        self.work.queue.insert(entry.instance, entry.clone());
        Ok(())
    }

    async fn delete_queue_entry(&mut self, instance: InstanceId) -> Result<(), DbError> {
        self.work
            .queue
            .remove(&instance)
            .map(|_| ())
            .ok_or_else(|| DbError::not_found("queue entry", instance))
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let MemoryTransaction { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
