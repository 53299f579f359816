//! # ferry-id
//!
//! Typed identifiers and name validation for ferry.
//!
//! ## Design Principles
//!
//! - Instances are identified by the UUID their source reports; the ID type
//!   wraps it so it cannot be mixed up with a worker secret
//! - Batches, windows and sources are identified by user-chosen names, which
//!   must pass [`validate_name`] before they are stored
//! - All IDs have a canonical string representation with strict parsing
//!
//! ## ID Format
//!
//! IDs are rendered as plain hyphenated UUIDs, which is what workers send
//! back on every poll:
//!
//! - `3f1c2a4e-8d2b-4c9e-9a7f-1b2c3d4e5f60`

mod error;
mod macros;
mod name;
mod types;

pub use error::IdError;
pub use name::{validate_name, MAX_NAME_LEN};
pub use types::*;

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
