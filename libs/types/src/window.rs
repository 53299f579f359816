//! Migration windows: validation and earliest-fit selection.
//!
//! A window bounds when a batch may perform final imports. Every bound is
//! optional; an unset bound is unbounded on that side. All checks take `now`
//! explicitly.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use ferry_id::validate_name;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;

/// Time reserved after a migration for rolling it back.
pub const ROLLBACK_BUFFER_SECS: i64 = 60;

/// A named interval of a batch during which final imports may run.
///
/// `Window::default()` has no bounds at all and is used as the
/// "no restriction" result of [`get_earliest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Window {
    pub name: String,
    #[serde(default)]
    pub batch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// After this point the window can no longer be used to modify targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout: Option<DateTime<Utc>>,
    /// Maximum number of instances finalized in this window. Zero means
    /// unlimited.
    #[serde(default)]
    pub capacity: i64,
}

/// No window can fit the requested duration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no available window fits a migration of {duration}")]
pub struct NoWindowAvailable {
    pub duration: Duration,
}

impl Window {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        validate_name(&self.name).map_err(|source| ValidationError::Name {
            field: "window name",
            source,
        })?;

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                return Err(ValidationError::EndBeforeStart {
                    window: self.name.clone(),
                    start,
                    end,
                });
            }
        }

        if let Some(end) = self.end {
            if end < now {
                return Err(ValidationError::EndInPast {
                    window: self.name.clone(),
                    end,
                });
            }
        }

        if let Some(lockout) = self.lockout {
            let before_start = self.start.is_some_and(|start| lockout < start);
            let after_end = self.end.is_some_and(|end| lockout > end);
            if before_start || after_end {
                return Err(ValidationError::LockoutOutOfRange {
                    window: self.name.clone(),
                    lockout,
                });
            }
        }

        if self.capacity < 0 {
            return Err(ValidationError::Negative {
                field: format!("window '{}' capacity", self.name),
                value: self.capacity,
            });
        }

        Ok(())
    }

    /// True once the end or the lockout has passed.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.end.is_some_and(|end| now > end) || self.lockout.is_some_and(|lockout| now > lockout)
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| now >= start)
    }

    /// True if a migration of `duration` starting no earlier than `now` and
    /// no earlier than the window start still ends, with the rollback
    /// buffer, before the window does.
    pub fn fits_duration(&self, duration: Duration, now: DateTime<Utc>) -> bool {
        if self.validate(now).is_err() || self.is_locked(now) {
            return false;
        }

        let Some(end) = self.end else {
            return true;
        };

        let begin = self.start.map_or(now, |start| start.max(now));
        begin + duration + Duration::seconds(ROLLBACK_BUFFER_SECS) <= end
    }

    /// True if `used` instances already exhaust the capacity.
    pub fn is_full(&self, used: usize) -> bool {
        self.capacity > 0 && used as i64 >= self.capacity
    }
}

/// Sort `windows` by start, validate each, and reject duplicate names and
/// overlapping intervals.
pub fn validate_windows(windows: &mut [Window], now: DateTime<Utc>) -> Result<(), ValidationError> {
    windows.sort_by_key(|w| w.start);

    let mut names = HashSet::new();
    for window in windows.iter() {
        window.validate(now)?;
        if !names.insert(window.name.as_str()) {
            return Err(ValidationError::DuplicateName {
                kind: "window",
                name: window.name.clone(),
            });
        }
    }

    for pair in windows.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let overlaps = match (prev.end, next.start) {
            (Some(prev_end), Some(next_start)) => next_start < prev_end,
            _ => true,
        };
        if overlaps {
            return Err(ValidationError::Overlap {
                first: prev.name.clone(),
                second: next.name.clone(),
            });
        }
    }

    Ok(())
}

/// The window with the earliest start that fits `duration`.
///
/// An empty set means there is no restriction and yields
/// `Window::default()`.
pub fn get_earliest(
    windows: &[Window],
    duration: Duration,
    now: DateTime<Utc>,
) -> Result<Window, NoWindowAvailable> {
    if windows.is_empty() {
        return Ok(Window::default());
    }

    windows
        .iter()
        .filter(|w| w.fits_duration(duration, now))
        .min_by_key(|w| w.start)
        .cloned()
        .ok_or(NoWindowAvailable { duration })
}
