//! Worker polling protocol.
//!
//! A worker repeatedly asks for a [`WorkerCommand`] and reports progress
//! with a [`WorkerResponse`]. Both calls carry the queue entry's secret.

use serde::{Deserialize, Serialize};

use crate::source::{SourceConnection, SourceType};

/// What the worker should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCommandKind {
    /// Nothing to do; poll again later.
    Idle,
    /// Sync disks in the background.
    ImportDisks,
    /// Perform the final cutover.
    FinalizeImport,
}

/// Command returned to a polling worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub command: WorkerCommandKind,
    /// Inventory path of the instance on the source.
    pub location: String,
    pub source_type: SourceType,
    pub source_connection: SourceConnection,
    pub os: String,
    pub os_version: String,
}

/// Outcome a worker reports for its current command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerResponseKind {
    Running,
    Success,
    Failed,
}

/// Status report sent by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: WorkerResponseKind,
    #[serde(default)]
    pub status_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wire_format() {
        let response: WorkerResponse =
            serde_json::from_str(r#"{"status":"failed","status_message":"disk gone"}"#).unwrap();
        assert_eq!(response.status, WorkerResponseKind::Failed);
        assert_eq!(response.status_message, "disk gone");

        let response: WorkerResponse = serde_json::from_str(r#"{"status":"running"}"#).unwrap();
        assert!(response.status_message.is_empty());
    }

    #[test]
    fn test_command_kind_names() {
        assert_eq!(
            serde_json::to_string(&WorkerCommandKind::FinalizeImport).unwrap(),
            "\"finalize_import\""
        );
    }
}
