//! Last worker contact per instance.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use ferry_id::InstanceId;

/// Shared across worker requests; safe for concurrent use.
#[derive(Debug, Default)]
pub struct WorkerContacts {
    seen: Mutex<HashMap<InstanceId, DateTime<Utc>>>,
}

impl WorkerContacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, instance: InstanceId, at: DateTime<Utc>) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance, at);
    }

    pub fn last_contact(&self, instance: InstanceId) -> Option<DateTime<Utc>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance)
            .copied()
    }

    pub fn forget(&self, instance: InstanceId) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&instance);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
