//! Fleet reconciler.
//!
//! Drives managed clusters toward their declared desired state: evaluates
//! reconciliation attempts, marks stalled operations, and exposes worker-pool
//! occupancy as the dispatch back-pressure signal.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_reconciler::config;
use fleet_reconciler::db::Database;
use fleet_reconciler::scheduler::BookkeeperWorker;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env();

    // Initialize tracing
    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fleet reconciler");
    info!(
        orphan_timeout_secs = config.orphan_timeout.as_secs(),
        occupancy_high_water_mark = config.occupancy_high_water_mark,
        "Configuration loaded"
    );

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    // Start the bookkeeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bookkeeper = BookkeeperWorker::new(
        db.operations_store(),
        config.orphan_timeout,
        config.bookkeeper_interval,
    );
    let bookkeeper_handle = tokio::spawn(async move {
        bookkeeper.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = bookkeeper_handle.await;

    Ok(())
}
