//! Batch runner background worker.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::engine::{Engine, EngineResult};

/// Worker that runs the engine's progress pass on an interval.
pub struct BatchRunner {
    engine: Engine,
    interval: Duration,
}

impl BatchRunner {
    pub fn new(engine: Engine, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting batch runner"
        );

        let mut interval = tokio::time::interval(self.interval);
        // First tick completes immediately; wait a full interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Batch progress pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Batch runner shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single progress pass.
    pub async fn run_once(&self) -> EngineResult<()> {
        self.engine.advance().await?;
        Ok(())
    }
}
