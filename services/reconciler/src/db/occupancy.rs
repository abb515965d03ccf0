//! Worker-pool occupancy registry.
//!
//! Each dispatcher registers one row per worker pool and reports its running
//! worker count; the scheduler reads per-component aggregates as its
//! back-pressure signal. Writes run in short transactions; aggregates are
//! single statements.

use chrono::{DateTime, Utc};
use fleet_model::WorkerPoolOccupancy;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, error, warn};

use super::error::is_unique_violation;
use super::DbError;

#[derive(Debug)]
struct OccupancyRow {
    worker_pool_id: String,
    component: String,
    worker_pool_capacity: i64,
    running_workers: i64,
    created: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for OccupancyRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            worker_pool_id: row.try_get("worker_pool_id")?,
            component: row.try_get("component")?,
            worker_pool_capacity: row.try_get("worker_pool_capacity")?,
            running_workers: row.try_get("running_workers")?,
            created: row.try_get("created")?,
        })
    }
}

impl From<OccupancyRow> for WorkerPoolOccupancy {
    fn from(row: OccupancyRow) -> Self {
        WorkerPoolOccupancy {
            worker_pool_id: row.worker_pool_id,
            component: row.component,
            worker_pool_capacity: row.worker_pool_capacity,
            running_workers: row.running_workers,
            created: row.created,
        }
    }
}

/// Persistent store for worker-pool occupancy rows.
#[derive(Clone)]
pub struct OccupancyStore {
    pool: PgPool,
}

impl OccupancyStore {
    /// Create a new occupancy store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bind subsequent operations to the caller's transaction.
    ///
    /// Lets a scheduler read-modify-write occupancy rows under one
    /// transaction without threading the handle through the core signatures.
    pub fn with_tx<'t>(tx: &'t mut Transaction<'static, Postgres>) -> OccupancyTx<'t> {
        OccupancyTx { tx }
    }

    /// Register a new worker pool with zero running workers.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidCapacity` when `capacity < 1` and
    /// `DbError::PoolAlreadyRegistered` on a worker pool id collision.
    pub async fn create_worker_pool_occupancy(
        &self,
        worker_pool_id: &str,
        component: &str,
        capacity: i64,
    ) -> Result<WorkerPoolOccupancy, DbError> {
        if capacity < 1 {
            return Err(DbError::InvalidCapacity {
                worker_pool_id: worker_pool_id.to_string(),
                capacity,
            });
        }

        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;
        let occupancy = OccupancyStore::with_tx(&mut tx)
            .create(worker_pool_id, component, capacity)
            .await?;
        tx.commit().await.map_err(DbError::Query)?;

        debug!(
            worker_pool_id = %worker_pool_id,
            component = %component,
            capacity,
            "Registered worker pool occupancy"
        );
        Ok(occupancy)
    }

    /// Persist a new running-worker count for a pool.
    ///
    /// Reads the current row under a row lock; an equal value is a logged
    /// no-op, a value above the pool capacity fails and leaves the row
    /// unchanged.
    pub async fn update_worker_pool_occupancy(
        &self,
        worker_pool_id: &str,
        running_workers: i64,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;
        let mut view = OccupancyStore::with_tx(&mut tx);

        let current = view.find_for_update(worker_pool_id).await?;
        if current.running_workers == running_workers {
            warn!(
                worker_pool_id = %worker_pool_id,
                running_workers,
                "Running worker count already persisted for worker pool"
            );
            tx.commit().await.map_err(DbError::Query)?;
            return Ok(());
        }
        if running_workers > current.worker_pool_capacity {
            // Transaction rolls back on drop, leaving the row unchanged.
            return Err(DbError::CapacityExceeded {
                worker_pool_id: worker_pool_id.to_string(),
                running_workers,
                capacity: current.worker_pool_capacity,
            });
        }

        view.set_running_workers(worker_pool_id, running_workers)
            .await?;
        tx.commit().await.map_err(DbError::Query)?;

        debug!(
            worker_pool_id = %worker_pool_id,
            running_workers,
            "Updated running worker count"
        );
        Ok(())
    }

    /// Delete a pool's occupancy row, returning the number of rows removed.
    ///
    /// Removing an unknown pool id is a success with count zero.
    pub async fn remove_worker_pool_occupancy(&self, worker_pool_id: &str) -> Result<u64, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;
        let result = sqlx::query("DELETE FROM worker_pool_occupancies WHERE worker_pool_id = $1")
            .bind(worker_pool_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(
                    worker_pool_id = %worker_pool_id,
                    error = %e,
                    "Failed to delete worker pool occupancy"
                );
                DbError::Query(e)
            })?;
        tx.commit().await.map_err(DbError::Query)?;

        debug!(
            worker_pool_id = %worker_pool_id,
            deleted = result.rows_affected(),
            "Deleted worker pool occupancy"
        );
        Ok(result.rows_affected())
    }

    /// Look up a single pool's occupancy row.
    pub async fn find_worker_pool_occupancy(
        &self,
        worker_pool_id: &str,
    ) -> Result<WorkerPoolOccupancy, DbError> {
        let row = sqlx::query_as::<_, OccupancyRow>(
            r#"
            SELECT worker_pool_id, component, worker_pool_capacity, running_workers, created
            FROM worker_pool_occupancies
            WHERE worker_pool_id = $1
            "#,
        )
        .bind(worker_pool_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(WorkerPoolOccupancy::from)
            .ok_or_else(|| DbError::OccupancyNotFound(worker_pool_id.to_string()))
    }

    /// All registered occupancy rows.
    ///
    /// An empty registry reports `DbError::NoOccupancies`: the dispatcher
    /// always expects at least its own pool to be present.
    pub async fn worker_pool_occupancies(&self) -> Result<Vec<WorkerPoolOccupancy>, DbError> {
        let rows = sqlx::query_as::<_, OccupancyRow>(
            r#"
            SELECT worker_pool_id, component, worker_pool_capacity, running_workers, created
            FROM worker_pool_occupancies
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if rows.is_empty() {
            return Err(DbError::NoOccupancies);
        }
        Ok(rows.into_iter().map(WorkerPoolOccupancy::from).collect())
    }

    /// Component tags of all registered pools, one entry per row.
    pub async fn component_list(&self) -> Result<Vec<String>, DbError> {
        let components: Vec<String> =
            sqlx::query_scalar("SELECT component FROM worker_pool_occupancies")
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::Query)?;

        if components.is_empty() {
            return Err(DbError::NoOccupancies);
        }
        Ok(components)
    }

    /// Mean occupancy of a component's pools as a percentage in [0, 100].
    ///
    /// Computed as `100 * sum(running_workers) / sum(capacity)` over all rows
    /// with the given component tag; the denominator is positive whenever any
    /// row matches because capacity is at least one.
    pub async fn mean_occupancy_by_component(&self, component: &str) -> Result<f64, DbError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pool_count,
                COALESCE(SUM(running_workers), 0)::BIGINT AS running_workers,
                COALESCE(SUM(worker_pool_capacity), 0)::BIGINT AS capacity
            FROM worker_pool_occupancies
            WHERE component = $1
            "#,
        )
        .bind(component)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let pool_count: i64 = row.get("pool_count");
        if pool_count == 0 {
            return Err(DbError::ComponentNotFound(component.to_string()));
        }

        let running: i64 = row.get("running_workers");
        let capacity: i64 = row.get("capacity");
        Ok(100.0 * running as f64 / capacity as f64)
    }
}

/// Occupancy operations bound to a caller-owned transaction.
pub struct OccupancyTx<'t> {
    tx: &'t mut Transaction<'static, Postgres>,
}

impl OccupancyTx<'_> {
    /// Insert a new occupancy row inside the bound transaction.
    pub async fn create(
        &mut self,
        worker_pool_id: &str,
        component: &str,
        capacity: i64,
    ) -> Result<WorkerPoolOccupancy, DbError> {
        let created = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO worker_pool_occupancies
                (worker_pool_id, component, worker_pool_capacity, running_workers, created)
            VALUES ($1, $2, $3, 0, $4)
            "#,
        )
        .bind(worker_pool_id)
        .bind(component)
        .bind(capacity)
        .bind(created)
        .execute(&mut **self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return DbError::PoolAlreadyRegistered(worker_pool_id.to_string());
            }
            error!(
                worker_pool_id = %worker_pool_id,
                error = %e,
                "Failed to create worker pool occupancy"
            );
            DbError::Query(e)
        })?;

        Ok(WorkerPoolOccupancy {
            worker_pool_id: worker_pool_id.to_string(),
            component: component.to_string(),
            worker_pool_capacity: capacity,
            running_workers: 0,
            created,
        })
    }

    /// Read a pool's row under `FOR UPDATE` so concurrent writers serialize.
    pub async fn find_for_update(
        &mut self,
        worker_pool_id: &str,
    ) -> Result<WorkerPoolOccupancy, DbError> {
        let row = sqlx::query_as::<_, OccupancyRow>(
            r#"
            SELECT worker_pool_id, component, worker_pool_capacity, running_workers, created
            FROM worker_pool_occupancies
            WHERE worker_pool_id = $1
            FOR UPDATE
            "#,
        )
        .bind(worker_pool_id)
        .fetch_optional(&mut **self.tx)
        .await
        .map_err(DbError::Query)?;

        row.map(WorkerPoolOccupancy::from)
            .ok_or_else(|| DbError::OccupancyNotFound(worker_pool_id.to_string()))
    }

    /// Write a new running-worker count for a pool.
    ///
    /// The capacity invariant is the caller's to check against the row read
    /// in this same transaction.
    pub async fn set_running_workers(
        &mut self,
        worker_pool_id: &str,
        running_workers: i64,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE worker_pool_occupancies SET running_workers = $2 WHERE worker_pool_id = $1",
        )
        .bind(worker_pool_id)
        .bind(running_workers)
        .execute(&mut **self.tx)
        .await
        .map_err(|e| {
            error!(
                worker_pool_id = %worker_pool_id,
                error = %e,
                "Failed to update worker pool occupancy"
            );
            DbError::Query(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(DbError::OccupancyNotFound(worker_pool_id.to_string()));
        }
        Ok(())
    }
}
