//! # NMOS Control Server
//!
//! Runs the orchestration core against PostgreSQL with the three background
//! runners until Ctrl+C or SIGTERM.
//!
//! ## Usage
//!
//! ```bash
//! NMOS_CONTROL_ENV=production \
//! NMOS_CONTROL__DATABASE__URL=postgres://localhost/nmos_control \
//!     cargo run --bin nmos-control
//! ```

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use nmos_control::config::ConfigLoader;
use nmos_control::is05::HttpConnectionApi;
use nmos_control::logging;
use nmos_control::orchestration::OrchestrationCore;
use nmos_control::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    let loader = ConfigLoader::from_environment();
    let config = loader.load().context("failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = loader.environment(),
        "Starting NMOS control server"
    );

    let store = Arc::new(
        PgStore::connect(&config.database)
            .await
            .context("failed to connect to database")?,
    );
    if config.database.run_migrations {
        store.migrate().await.context("failed to run migrations")?;
    }

    let api = Arc::new(HttpConnectionApi::new(&config.is05).context("failed to build IS-05 client")?);

    let mut core = OrchestrationCore::bootstrap(store.clone(), store.clone(), store, api, config);
    core.start();
    info!("NMOS control server started, press Ctrl+C to shut down");

    shutdown_signal().await;

    info!("Shutdown signal received");
    core.shutdown().await;
    info!("NMOS control server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
