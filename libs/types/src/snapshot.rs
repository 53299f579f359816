//! Flattened, read-only view of an instance used as the expression subject.

use std::collections::BTreeMap;

use ferry_expr::{Environment, Kind, Value};

use crate::instance::{Disk, Instance, InstanceProperties, Nic, Snapshot};
use crate::source::SourceType;

/// What include and constraint expressions see of an instance.
///
/// Field names are matched case-insensitively with underscores ignored, so
/// `OSVersion`, `osversion` and `os_version` name the same field.
///
/// | Field | Kind |
/// |-------|------|
/// | `uuid`, `source`, `source_type`, `name`, `description`, `location`, `os`, `os_version`, `architecture` | string |
/// | `cpus`, `memory` | int |
/// | `legacy_boot`, `secure_boot`, `tpm`, `background_import` | bool |
/// | `disks` (`name`, `capacity`, `shared`), `nics` (`id`, `network`, `hardware_address`, `ipv4_address`), `snapshots` (`name`) | list of maps |
/// | `config` | map of strings |
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSnapshot {
    uuid: String,
    source: String,
    source_type: SourceType,
    props: InstanceProperties,
}

impl InstanceSnapshot {
    /// Snapshot of `instance` with overrides applied.
    pub fn new(instance: &Instance, source_type: SourceType) -> Self {
        Self {
            uuid: instance.uuid.to_string(),
            source: instance.source.clone(),
            source_type,
            props: instance.effective_properties(),
        }
    }
}

fn normalize(field: &str) -> String {
    field
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn disk_value(disk: &Disk) -> Value {
    Value::Map(BTreeMap::from([
        ("name".to_string(), Value::from(disk.name.as_str())),
        ("capacity".to_string(), Value::from(disk.capacity)),
        ("shared".to_string(), Value::from(disk.shared)),
    ]))
}

fn nic_value(nic: &Nic) -> Value {
    Value::Map(BTreeMap::from([
        ("id".to_string(), Value::from(nic.id.as_str())),
        ("network".to_string(), Value::from(nic.network.as_str())),
        (
            "hardware_address".to_string(),
            Value::from(nic.hardware_address.as_str()),
        ),
        (
            "ipv4_address".to_string(),
            Value::from(nic.ipv4_address.as_str()),
        ),
    ]))
}

fn snapshot_value(snapshot: &Snapshot) -> Value {
    Value::Map(BTreeMap::from([(
        "name".to_string(),
        Value::from(snapshot.name.as_str()),
    )]))
}

impl Environment for InstanceSnapshot {
    fn kind_of(field: &str) -> Option<Kind> {
        let kind = match normalize(field).as_str() {
            "uuid" | "source" | "sourcetype" | "name" | "description" | "location" | "os"
            | "osversion" | "architecture" => Kind::String,
            "cpus" | "memory" => Kind::Int,
            "legacyboot" | "secureboot" | "tpm" | "backgroundimport" => Kind::Bool,
            "disks" | "nics" | "snapshots" => Kind::List,
            "config" => Kind::Map,
            _ => return None,
        };
        Some(kind)
    }

    fn lookup(&self, field: &str) -> Option<Value> {
        let p = &self.props;
        let value = match normalize(field).as_str() {
            "uuid" => Value::from(self.uuid.as_str()),
            "source" => Value::from(self.source.as_str()),
            "sourcetype" => Value::from(self.source_type.as_str()),
            "name" => Value::from(p.name.as_str()),
            "description" => Value::from(p.description.as_str()),
            "location" => Value::from(p.location.as_str()),
            "os" => Value::from(p.os.as_str()),
            "osversion" => Value::from(p.os_version.as_str()),
            "architecture" => Value::from(p.architecture.as_str()),
            "cpus" => Value::from(p.cpus),
            "memory" => Value::from(p.memory),
            "legacyboot" => Value::from(p.legacy_boot),
            "secureboot" => Value::from(p.secure_boot),
            "tpm" => Value::from(p.tpm),
            "backgroundimport" => Value::from(p.background_import),
            "disks" => Value::List(p.disks.iter().map(disk_value).collect()),
            "nics" => Value::List(p.nics.iter().map(nic_value).collect()),
            "snapshots" => Value::List(p.snapshots.iter().map(snapshot_value).collect()),
            "config" => Value::Map(
                p.config
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                    .collect(),
            ),
            _ => return None,
        };
        Some(value)
    }
}
