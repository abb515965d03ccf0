//! Database layer for the reconciler.
//!
//! This module provides:
//! - Connection pool management
//! - The worker-pool occupancy registry
//! - Persistence for reconciliations and their operations
//!
//! The database layer uses SQLx with Postgres; the schema migrations are
//! embedded in the binary and applied in order on startup.

mod error;
mod occupancy;
mod operations;

pub use error::DbError;
pub use occupancy::{OccupancyStore, OccupancyTx};
pub use operations::{NewOperation, OperationsStore};

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Schema migrations shipped with the binary.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connection settings for the reconciler's Postgres store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Postgres connection URL.
    pub database_url: String,

    /// Upper bound on pooled connections. The bookkeeper and every
    /// dispatcher share one pool, so this caps concurrent repository calls.
    pub max_connections: u32,

    /// Idle connections kept warm between bookkeeping passes.
    pub min_connections: u32,

    /// How long a repository call may wait for a free connection before it
    /// surfaces a backend failure.
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/fleet".to_string(),
            max_connections: 8,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Load connection settings from the environment.
    ///
    /// `FLEET_DATABASE_URL` wins over the conventional `DATABASE_URL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: std::env::var("FLEET_DATABASE_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .unwrap_or(defaults.database_url),
            max_connections: env_u32("FLEET_DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_u32("FLEET_DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout: defaults.acquire_timeout,
        }
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open a connection pool against the configured store.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let pool = config
            .pool_options()
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Reconciler store connected"
        );
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the store is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Apply any pending embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        MIGRATOR.run(&self.pool).await.map_err(DbError::Migration)?;
        info!("Schema migrations applied");
        Ok(())
    }

    /// Get an occupancy store handle.
    pub fn occupancy_store(&self) -> OccupancyStore {
        OccupancyStore::new(self.pool.clone())
    }

    /// Get an operations store handle.
    pub fn operations_store(&self) -> OperationsStore {
        OperationsStore::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_env_u32_falls_back_on_garbage() {
        assert_eq!(env_u32("FLEET_DB_TEST_UNSET_KNOB", 8), 8);
    }
}
