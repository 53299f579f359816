//! Queue listings.

use chrono::{DateTime, Utc};
use ferry_id::InstanceId;
use ferry_types::QueueEntry;
use serde::Serialize;

use super::error::EngineResult;
use super::Engine;
use crate::db::QueueFilter;

/// A queue entry as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct QueueView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub last_worker_contact: Option<DateTime<Utc>>,
}

impl Engine {
    fn view(&self, entry: QueueEntry) -> QueueView {
        QueueView {
            last_worker_contact: self.contacts.last_contact(entry.instance),
            entry,
        }
    }

    pub async fn queue(&self, filter: QueueFilter) -> EngineResult<Vec<QueueView>> {
        let mut tx = self.begin().await?;
        let entries = tx.list_queue_entries(&[filter]).await?;
        Ok(entries.into_iter().map(|e| self.view(e)).collect())
    }

    pub async fn get_queue_entry(&self, uuid: InstanceId) -> EngineResult<QueueView> {
        let mut tx = self.begin().await?;
        let entry = tx.get_queue_entry(uuid).await?;
        Ok(self.view(entry))
    }
}
