//! ferry orchestrator library.
//!
//! This crate primarily ships the `orchestrator` binary; the library surface
//! exists for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod runner;
pub mod state;
