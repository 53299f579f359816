//! Typed ID definitions.

use crate::define_id;

// =============================================================================
// Inventory
// =============================================================================

define_id!(InstanceId, "instance id");

// =============================================================================
// Worker Protocol
// =============================================================================

// Handed to the worker when its queue entry is created; every poll and status
// report must present it.
define_id!(WorkerSecret, "worker secret");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "request id", v7);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_roundtrip() {
        let id = InstanceId::new();
        let s = id.to_string();
        let parsed: InstanceId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_instance_id_is_plain_uuid() {
        let id: InstanceId = "3f1c2a4e-8d2b-4c9e-9a7f-1b2c3d4e5f60".parse().unwrap();
        assert_eq!(id.to_string(), "3f1c2a4e-8d2b-4c9e-9a7f-1b2c3d4e5f60");
    }

    #[test]
    fn test_instance_id_empty() {
        let result: Result<InstanceId, _> = "  ".parse();
        assert!(matches!(result, Err(crate::IdError::Empty { .. })));
    }

    #[test]
    fn test_instance_id_invalid_uuid() {
        let result: Result<InstanceId, _> = "inst_invalid".parse();
        assert!(matches!(result, Err(crate::IdError::InvalidUuid { .. })));
    }

    #[test]
    fn test_worker_secret_json_roundtrip() {
        let secret = WorkerSecret::new();
        let json = serde_json::to_string(&secret).unwrap();
        let parsed: WorkerSecret = serde_json::from_str(&json).unwrap();
        assert_eq!(secret, parsed);
    }

    #[test]
    fn test_request_id_sortable() {
        let id1 = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = RequestId::new();
        // v7 UUIDs are time-ordered
        assert!(id1 < id2);
    }

    proptest::proptest! {
        #[test]
        fn prop_parse_display_roundtrip(bytes in proptest::prelude::any::<[u8; 16]>()) {
            let id = InstanceId::from_uuid(crate::Uuid::from_bytes(bytes));
            let parsed = InstanceId::parse(&id.to_string()).unwrap();
            proptest::prop_assert_eq!(id, parsed);
        }
    }
}
