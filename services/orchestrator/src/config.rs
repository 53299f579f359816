use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::db::DbConfig;

/// Where the orchestrator keeps its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Process-local; lost on restart.
    Memory,
    Postgres,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => bail!("unknown storage kind '{other}', expected 'memory' or 'postgres'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub storage: StorageKind,
    /// How often the batch runner advances running batches.
    pub runner_interval: Duration,
    pub database: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("FERRY_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8443".to_string())
            .parse()?;

        let log_level = std::env::var("FERRY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("FERRY_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let storage = std::env::var("FERRY_STORAGE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let runner_interval = std::env::var("FERRY_RUNNER_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        let database = DbConfig::from_env();

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            storage,
            runner_interval,
            database,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parse() {
        assert_eq!("memory".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert_eq!("Postgres".parse::<StorageKind>().unwrap(), StorageKind::Postgres);
        assert!("sqlite".parse::<StorageKind>().is_err());
    }
}
