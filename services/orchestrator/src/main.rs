//! ferry orchestrator
//!
//! Serves the batch, window and queue API, answers worker polls and drives
//! running batches forward in the background.

use std::sync::Arc;

use anyhow::Result;
use ferry_orchestrator::{
    api,
    config::{self, StorageKind},
    db::{MemoryStore, PgStore, Store},
    engine::{BatchDefaults, Engine, MockProvisioner},
    runner::BatchRunner,
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn open_store(config: &config::Config) -> Result<Arc<dyn Store>> {
    match config.storage {
        StorageKind::Memory => {
            warn!("Using in-memory storage; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageKind::Postgres => {
            let store = match PgStore::connect(&config.database).await {
                Ok(store) => {
                    info!("Database connection established");
                    store
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = store.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to FERRY_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting ferry orchestrator");
    info!(
        listen_addr = %config.listen_addr,
        storage = ?config.storage,
        "Configuration loaded"
    );

    let store = open_store(&config).await?;

    // No target platform integration yet; targets are provisioned by the mock
    warn!("Using mock target provisioner");
    let engine = Engine::new(
        store,
        Arc::new(BatchDefaults),
        Arc::new(MockProvisioner::new()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = BatchRunner::new(engine.clone(), config.runner_interval);
    let runner_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            runner.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for batch runner to shut down...");
    if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(10), runner_handle).await {
        warn!(error = %e, "Batch runner did not shut down in time");
    }

    info!("Orchestrator shutdown complete");
    Ok(())
}
