//! Window replacement.
//!
//! A batch's window set is replaced as a whole. Windows that queue entries
//! already reference must keep every guarantee they gave those entries:
//! they stay, and none of their bounds may tighten.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use ferry_types::{validate_windows, Window};
use tracing::{info, instrument};

use super::error::{EngineError, EngineResult};
use super::Engine;
use crate::db::QueueFilter;

/// `new` starts no later than `old`; unset means unbounded.
fn starts_no_later(new: Option<DateTime<Utc>>, old: Option<DateTime<Utc>>) -> bool {
    match (new, old) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(new), Some(old)) => new <= old,
    }
}

/// `new` ends no earlier than `old`; unset means unbounded.
fn ends_no_earlier(new: Option<DateTime<Utc>>, old: Option<DateTime<Utc>>) -> bool {
    match (new, old) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(new), Some(old)) => new >= old,
    }
}

/// Capacity 0 is unlimited.
fn capacity_no_smaller(new: i64, old: i64) -> bool {
    new == 0 || (old != 0 && new >= old)
}

/// Check that `replacement` does not weaken any window in `in_use`.
pub fn check_replacement(
    current: &[Window],
    replacement: &[Window],
    in_use: &HashSet<String>,
) -> EngineResult<()> {
    let replacement: HashMap<&str, &Window> =
        replacement.iter().map(|w| (w.name.as_str(), w)).collect();

    for old in current.iter().filter(|w| in_use.contains(&w.name)) {
        let name = &old.name;
        let Some(new) = replacement.get(name.as_str()) else {
            return Err(EngineError::not_permitted(format!(
                "window '{name}' is in use and cannot be removed"
            )));
        };
        if !starts_no_later(new.start, old.start) {
            return Err(EngineError::not_permitted(format!(
                "window '{name}' is in use; its start can only move earlier"
            )));
        }
        if !ends_no_earlier(new.end, old.end) {
            return Err(EngineError::not_permitted(format!(
                "window '{name}' is in use; its end can only move later"
            )));
        }
        if !ends_no_earlier(new.lockout, old.lockout) {
            return Err(EngineError::not_permitted(format!(
                "window '{name}' is in use; its lockout can only move later"
            )));
        }
        if !capacity_no_smaller(new.capacity, old.capacity) {
            return Err(EngineError::not_permitted(format!(
                "window '{name}' is in use; its capacity can only grow"
            )));
        }
    }

    Ok(())
}

impl Engine {
    /// Windows of `batch`, ordered by start.
    pub async fn windows(&self, batch: &str) -> EngineResult<Vec<Window>> {
        let mut tx = self.begin().await?;
        tx.get_batch(batch).await?;
        Ok(tx.list_windows(batch).await?)
    }

    /// Replace the window set of `batch`.
    #[instrument(skip(self, windows), fields(count = windows.len()))]
    pub async fn replace_windows(
        &self,
        batch: &str,
        mut windows: Vec<Window>,
    ) -> EngineResult<Vec<Window>> {
        let now = Utc::now();
        for window in &mut windows {
            window.batch = batch.to_string();
        }
        validate_windows(&mut windows, now)?;

        let mut tx = self.begin().await?;
        tx.get_batch(batch).await?;

        let current = tx.list_windows(batch).await?;
        let in_use: HashSet<String> = tx
            .list_queue_entries(&[QueueFilter::in_batch(batch)])
            .await?
            .into_iter()
            .filter_map(|entry| entry.window)
            .collect();

        check_replacement(&current, &windows, &in_use)?;

        let keep: HashSet<&str> = windows.iter().map(|w| w.name.as_str()).collect();
        let existing: HashSet<&str> = current.iter().map(|w| w.name.as_str()).collect();

        for old in current.iter().filter(|w| !keep.contains(w.name.as_str())) {
            tx.delete_window(batch, &old.name).await?;
        }
        for window in &windows {
            if existing.contains(window.name.as_str()) {
                tx.update_window(window).await?;
            } else {
                tx.create_window(window).await?;
            }
        }

        tx.commit().await?;

        info!(batch = %batch, windows = windows.len(), "Replaced batch windows");
        Ok(windows)
    }
}
