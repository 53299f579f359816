//! Migration and batch lifecycle states.
//!
//! ```text
//! NotAssigned -> AssignedToBatch -> Creating -> BackgroundImport <-> Idle
//!                                                  Idle -> FinalImport -> ImportComplete
//! any migrating state -> Error
//! NotAssigned | AssignedToBatch <-> UserDisabled
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownStatus;
use crate::worker::WorkerResponseKind;

/// Migration status of a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Not a member of any batch.
    #[default]
    NotAssigned,
    /// Member of a batch that has not started migrating it.
    AssignedToBatch,
    /// The target instance is being created.
    Creating,
    /// The worker is syncing disks ahead of the final cutover.
    BackgroundImport,
    /// Waiting for the next worker command.
    Idle,
    /// The worker is performing the final cutover.
    FinalImport,
    /// The final cutover finished.
    ImportComplete,
    /// Migration failed.
    Error,
    /// Excluded from batches by an operator.
    UserDisabled,
}

impl MigrationStatus {
    pub const ALL: [MigrationStatus; 9] = [
        Self::NotAssigned,
        Self::AssignedToBatch,
        Self::Creating,
        Self::BackgroundImport,
        Self::Idle,
        Self::FinalImport,
        Self::ImportComplete,
        Self::Error,
        Self::UserDisabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAssigned => "not_assigned",
            Self::AssignedToBatch => "assigned_to_batch",
            Self::Creating => "creating",
            Self::BackgroundImport => "background_import",
            Self::Idle => "idle",
            Self::FinalImport => "final_import",
            Self::ImportComplete => "import_complete",
            Self::Error => "error",
            Self::UserDisabled => "user_disabled",
        }
    }

    /// True while the instance is under active migration.
    ///
    /// A migrating instance cannot be reassigned, edited, disabled or deleted.
    pub fn is_migrating(&self) -> bool {
        matches!(
            self,
            Self::Creating
                | Self::BackgroundImport
                | Self::Idle
                | Self::FinalImport
                | Self::ImportComplete
        )
    }

    /// Status after a worker reports `response`, or `None` if the report
    /// does not move the state (the status message is still updated).
    ///
    /// Callers must reject reports for entries that are not migrating
    /// before consulting this.
    pub fn after_worker_response(&self, response: WorkerResponseKind) -> Option<MigrationStatus> {
        match (response, self) {
            (WorkerResponseKind::Failed, _) => Some(Self::Error),
            (WorkerResponseKind::Success, Self::BackgroundImport) => Some(Self::Idle),
            (WorkerResponseKind::Success, Self::FinalImport) => Some(Self::ImportComplete),
            (WorkerResponseKind::Success, _) | (WorkerResponseKind::Running, _) => None,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                kind: "migration status",
                value: s.to_string(),
            })
    }
}

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Defined,
    Running,
    Stopped,
    Finished,
    Error,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 5] = [
        Self::Defined,
        Self::Running,
        Self::Stopped,
        Self::Finished,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Defined => "defined",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// True if the batch definition and its membership may change.
    pub fn can_be_modified(&self) -> bool {
        matches!(self, Self::Defined | Self::Stopped | Self::Error)
    }

    /// True if the batch may be (re)started.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Defined | Self::Stopped | Self::Error)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                kind: "batch status",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in MigrationStatus::ALL {
            assert_eq!(status.as_str().parse::<MigrationStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        for status in BatchStatus::ALL {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
        assert!("migrating".parse::<MigrationStatus>().is_err());
    }

    #[test]
    fn test_migrating_set() {
        let migrating: Vec<_> = MigrationStatus::ALL
            .into_iter()
            .filter(MigrationStatus::is_migrating)
            .collect();
        assert_eq!(
            migrating,
            vec![
                MigrationStatus::Creating,
                MigrationStatus::BackgroundImport,
                MigrationStatus::Idle,
                MigrationStatus::FinalImport,
                MigrationStatus::ImportComplete,
            ]
        );
    }

    #[test]
    fn test_failed_always_lands_in_error() {
        for status in MigrationStatus::ALL.into_iter().filter(MigrationStatus::is_migrating) {
            assert_eq!(
                status.after_worker_response(WorkerResponseKind::Failed),
                Some(MigrationStatus::Error)
            );
        }
    }

    #[test]
    fn test_success_advances_import_phases_only() {
        use MigrationStatus::*;
        assert_eq!(
            BackgroundImport.after_worker_response(WorkerResponseKind::Success),
            Some(Idle)
        );
        assert_eq!(
            FinalImport.after_worker_response(WorkerResponseKind::Success),
            Some(ImportComplete)
        );
        // A repeated success after the state already advanced is a no-op.
        assert_eq!(Idle.after_worker_response(WorkerResponseKind::Success), None);
        assert_eq!(
            ImportComplete.after_worker_response(WorkerResponseKind::Success),
            None
        );
    }

    #[test]
    fn test_running_never_changes_state() {
        for status in MigrationStatus::ALL {
            assert_eq!(status.after_worker_response(WorkerResponseKind::Running), None);
        }
    }

    #[test]
    fn test_batch_modifiable_states() {
        assert!(BatchStatus::Defined.can_be_modified());
        assert!(BatchStatus::Stopped.can_start());
        assert!(!BatchStatus::Running.can_be_modified());
        assert!(!BatchStatus::Finished.can_start());
    }
}
