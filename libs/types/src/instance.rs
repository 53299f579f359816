//! Instances discovered on a source.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ferry_id::{validate_name, InstanceId};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::status::MigrationStatus;

/// A virtual disk attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Disk {
    pub name: String,
    /// Capacity in bytes.
    pub capacity: i64,
    #[serde(default)]
    pub shared: bool,
}

/// A network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Nic {
    pub id: String,
    pub network: String,
    pub hardware_address: String,
    #[serde(default)]
    pub ipv4_address: String,
}

/// A snapshot present on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub name: String,
}

/// Properties reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InstanceProperties {
    pub name: String,
    pub description: String,
    /// Inventory path on the source, e.g. `/dc1/vm/web/web01`.
    pub location: String,
    pub os: String,
    pub os_version: String,
    pub architecture: String,
    pub cpus: i64,
    /// Memory in bytes.
    pub memory: i64,
    pub legacy_boot: bool,
    pub secure_boot: bool,
    pub tpm: bool,
    /// The source supports syncing disks before the final cutover.
    pub background_import: bool,
    pub disks: Vec<Disk>,
    pub nics: Vec<Nic>,
    pub snapshots: Vec<Snapshot>,
    pub config: BTreeMap<String, String>,
}

/// Operator overrides applied on top of source properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InstanceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

impl InstanceOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            validate_name(name).map_err(|source| ValidationError::Name {
                field: "instance name override",
                source,
            })?;
        }
        for (field, value) in [("cpus", self.cpus), ("memory", self.memory)] {
            if let Some(value) = value.filter(|v| *v < 0) {
                return Err(ValidationError::Negative {
                    field: field.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }
}

/// A virtual machine tracked for migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: InstanceId,
    /// Name of the source the instance was discovered on.
    pub source: String,
    pub properties: InstanceProperties,
    #[serde(default)]
    pub overrides: InstanceOverrides,
    /// Batch the instance is currently assigned to.
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub status: MigrationStatus,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub needs_disk_import: bool,
    pub last_update_from_source: DateTime<Utc>,
}

impl Instance {
    /// A freshly discovered, unassigned instance.
    pub fn new(uuid: InstanceId, source: impl Into<String>, properties: InstanceProperties) -> Self {
        Self {
            uuid,
            source: source.into(),
            properties,
            overrides: InstanceOverrides::default(),
            batch: None,
            status: MigrationStatus::NotAssigned,
            status_message: String::new(),
            needs_disk_import: true,
            last_update_from_source: Utc::now(),
        }
    }

    /// Source properties with overrides applied.
    pub fn effective_properties(&self) -> InstanceProperties {
        let mut props = self.properties.clone();
        let o = &self.overrides;

        if let Some(name) = &o.name {
            props.name = name.clone();
        }
        if let Some(description) = &o.description {
            props.description = description.clone();
        }
        if let Some(os) = &o.os {
            props.os = os.clone();
        }
        if let Some(os_version) = &o.os_version {
            props.os_version = os_version.clone();
        }
        if let Some(architecture) = &o.architecture {
            props.architecture = architecture.clone();
        }
        if let Some(cpus) = o.cpus {
            props.cpus = cpus;
        }
        if let Some(memory) = o.memory {
            props.memory = memory;
        }
        for (key, value) in &o.config {
            props.config.insert(key.clone(), value.clone());
        }

        props
    }

    pub fn is_migrating(&self) -> bool {
        self.status.is_migrating()
    }

    pub fn is_user_disabled(&self) -> bool {
        self.status == MigrationStatus::UserDisabled
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.properties.name).map_err(|source| ValidationError::Name {
            field: "instance name",
            source,
        })?;
        if self.source.is_empty() {
            return Err(ValidationError::Missing {
                field: "instance source",
            });
        }
        self.overrides.validate()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::instance;
    use super::*;

    #[test]
    fn test_overrides_take_precedence() {
        let mut inst = instance("web01");
        inst.properties.config.insert("env".into(), "prod".into());
        inst.overrides.name = Some("web01-renamed".into());
        inst.overrides.cpus = Some(8);
        inst.overrides.config.insert("owner".into(), "web".into());

        let props = inst.effective_properties();
        assert_eq!(props.name, "web01-renamed");
        assert_eq!(props.cpus, 8);
        assert_eq!(props.os, "Ubuntu");
        assert_eq!(props.config.get("env").map(String::as_str), Some("prod"));
        assert_eq!(props.config.get("owner").map(String::as_str), Some("web"));

        // Source values are untouched.
        assert_eq!(inst.properties.name, "web01");
    }

    #[test]
    fn test_new_instance_is_unassigned() {
        let inst = instance("web01");
        assert_eq!(inst.status, MigrationStatus::NotAssigned);
        assert!(inst.batch.is_none());
        assert!(!inst.is_migrating());
        assert!(inst.validate().is_ok());
    }

    #[test]
    fn test_negative_override_rejected() {
        let mut inst = instance("web01");
        inst.overrides.memory = Some(-1);
        assert_eq!(
            inst.validate(),
            Err(ValidationError::Negative {
                field: "memory".to_string(),
                value: -1
            })
        );
    }

    #[test]
    fn test_overrides_empty() {
        assert!(InstanceOverrides::default().is_empty());
        let overrides: InstanceOverrides = serde_json::from_str(r#"{"os":"Debian"}"#).unwrap();
        assert!(!overrides.is_empty());
        assert_eq!(overrides.os.as_deref(), Some("Debian"));
    }
}
