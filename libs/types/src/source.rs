//! Migration sources.

use std::fmt;
use std::str::FromStr;

use ferry_id::validate_name;
use serde::{Deserialize, Serialize};

use crate::error::{UnknownStatus, ValidationError};

/// Kind of environment instances are discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Common,
    Vmware,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Vmware => "vmware",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "common" => Ok(Self::Common),
            "vmware" => Ok(Self::Vmware),
            other => Err(UnknownStatus {
                kind: "source type",
                value: other.to_string(),
            }),
        }
    }
}

/// Connection details handed to workers so they can reach the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceConnection {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Skip TLS verification.
    #[serde(default)]
    pub insecure: bool,
    /// SHA-256 fingerprint of a certificate to trust despite verification
    /// failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_fingerprint: Option<String>,
}

/// A named environment instances are migrated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub source_type: SourceType,
    pub connection: SourceConnection,
}

impl Source {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name).map_err(|source| ValidationError::Name {
            field: "source name",
            source,
        })?;
        if self.connection.endpoint.trim().is_empty() {
            return Err(ValidationError::Missing {
                field: "source endpoint",
            });
        }
        Ok(())
    }
}
