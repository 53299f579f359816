//! Background progress runner.
//!
//! Periodically drives running batches forward: provisions newly queued
//! instances, finalizes completed imports and closes out finished batches.

mod worker;

pub use worker::BatchRunner;
