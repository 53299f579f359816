//! # ferry-types
//!
//! Domain types shared by the orchestrator and its workers.
//!
//! ## Design Principles
//!
//! - Types are plain data; persistence and transport live elsewhere
//! - Anything that can be checked without storage (names, expressions,
//!   window bounds) is checked here, before a write is attempted
//! - Time-dependent checks take `now` explicitly so they are deterministic
//!
//! ## Model
//!
//! - [`Source`]: where instances are discovered
//! - [`Instance`]: a VM to migrate, with its [`MigrationStatus`]
//! - [`Batch`]: a group of instances selected by an include expression,
//!   with optional [`Constraint`]s
//! - [`Window`]: a time interval during which a batch may finalize imports
//! - [`QueueEntry`]: an instance under active migration
//! - [`WorkerCommand`] / [`WorkerResponse`]: the worker polling protocol

mod batch;
mod error;
mod instance;
mod queue;
mod snapshot;
mod source;
mod status;
mod window;
mod worker;

pub use batch::*;
pub use error::{UnknownStatus, ValidationError};
pub use instance::*;
pub use queue::*;
pub use snapshot::InstanceSnapshot;
pub use source::*;
pub use status::*;
pub use window::*;
pub use worker::*;
