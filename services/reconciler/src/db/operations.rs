//! Persistence for reconciliations and their component operations.
//!
//! A reconciliation attempt and its operations are registered atomically;
//! afterwards the scheduler flips operation states as workers report in and
//! the bookkeeper writes the aggregate status it derives from them.

use chrono::Utc;
use fleet_model::{ClusterStatus, Operation, OperationState, OperationType, Reconciliation};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, error};

use super::error::is_unique_violation;
use super::DbError;

/// Input for registering one operation of a new reconciliation.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub priority: i64,
    pub correlation_id: String,
}

#[derive(Debug)]
struct ReconciliationRow {
    runtime_id: String,
    scheduling_id: String,
    status: String,
    finished: bool,
    created: chrono::DateTime<Utc>,
    updated: chrono::DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ReconciliationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            runtime_id: row.try_get("runtime_id")?,
            scheduling_id: row.try_get("scheduling_id")?,
            status: row.try_get("status")?,
            finished: row.try_get("finished")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

impl ReconciliationRow {
    fn into_reconciliation(self) -> Result<Reconciliation, DbError> {
        Ok(Reconciliation {
            runtime_id: self.runtime_id,
            scheduling_id: self.scheduling_id,
            status: self.status.parse()?,
            finished: self.finished,
            created: self.created,
            updated: self.updated,
        })
    }
}

#[derive(Debug)]
struct OperationRow {
    priority: i64,
    runtime_id: String,
    scheduling_id: String,
    correlation_id: String,
    op_type: String,
    state: String,
    updated: chrono::DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for OperationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            priority: row.try_get("priority")?,
            runtime_id: row.try_get("runtime_id")?,
            scheduling_id: row.try_get("scheduling_id")?,
            correlation_id: row.try_get("correlation_id")?,
            op_type: row.try_get("type")?,
            state: row.try_get("state")?,
            updated: row.try_get("updated")?,
        })
    }
}

impl OperationRow {
    fn into_operation(self) -> Result<Operation, DbError> {
        Ok(Operation {
            priority: self.priority,
            runtime_id: self.runtime_id,
            scheduling_id: self.scheduling_id,
            correlation_id: self.correlation_id,
            op_type: self.op_type.parse()?,
            state: self.state.parse()?,
            updated: self.updated,
        })
    }
}

/// Persistent store for reconciliations and operations.
#[derive(Clone)]
pub struct OperationsStore {
    pool: PgPool,
}

impl OperationsStore {
    /// Create a new operations store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a reconciliation attempt and all of its operations.
    ///
    /// One transaction: either the attempt and every operation land, or
    /// nothing does.
    pub async fn register_reconciliation(
        &self,
        runtime_id: &str,
        scheduling_id: &str,
        op_type: OperationType,
        operations: &[NewOperation],
    ) -> Result<Reconciliation, DbError> {
        let now = Utc::now();
        let status = op_type.in_flight_status();

        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        sqlx::query(
            r#"
            INSERT INTO reconciliations (scheduling_id, runtime_id, status, finished, created, updated)
            VALUES ($1, $2, $3, FALSE, $4, $4)
            "#,
        )
        .bind(scheduling_id)
        .bind(runtime_id)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return DbError::SchedulingIdInUse(scheduling_id.to_string());
            }
            error!(
                scheduling_id = %scheduling_id,
                error = %e,
                "Failed to register reconciliation"
            );
            DbError::Query(e)
        })?;

        for op in operations {
            sqlx::query(
                r#"
                INSERT INTO operations
                    (scheduling_id, correlation_id, runtime_id, priority, type, state, updated)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(scheduling_id)
            .bind(&op.correlation_id)
            .bind(runtime_id)
            .bind(op.priority)
            .bind(op_type.as_str())
            .bind(OperationState::New.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;
        }

        tx.commit().await.map_err(DbError::Query)?;

        debug!(
            runtime_id = %runtime_id,
            scheduling_id = %scheduling_id,
            operation_count = operations.len(),
            "Registered reconciliation"
        );

        Ok(Reconciliation {
            runtime_id: runtime_id.to_string(),
            scheduling_id: scheduling_id.to_string(),
            status,
            finished: false,
            created: now,
            updated: now,
        })
    }

    /// Look up one reconciliation attempt.
    pub async fn get_reconciliation(&self, scheduling_id: &str) -> Result<Reconciliation, DbError> {
        let row = sqlx::query_as::<_, ReconciliationRow>(
            r#"
            SELECT scheduling_id, runtime_id, status, finished, created, updated
            FROM reconciliations
            WHERE scheduling_id = $1
            "#,
        )
        .bind(scheduling_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.ok_or_else(|| DbError::ReconciliationNotFound(scheduling_id.to_string()))?
            .into_reconciliation()
    }

    /// All attempts the bookkeeper still tracks.
    pub async fn unfinished_reconciliations(&self) -> Result<Vec<Reconciliation>, DbError> {
        let rows = sqlx::query_as::<_, ReconciliationRow>(
            r#"
            SELECT scheduling_id, runtime_id, status, finished, created, updated
            FROM reconciliations
            WHERE NOT finished
            ORDER BY created
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter()
            .map(ReconciliationRow::into_reconciliation)
            .collect()
    }

    /// All operations of one attempt.
    pub async fn get_operations(&self, scheduling_id: &str) -> Result<Vec<Operation>, DbError> {
        let rows = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT scheduling_id, correlation_id, runtime_id, priority, type, state, updated
            FROM operations
            WHERE scheduling_id = $1
            ORDER BY priority, correlation_id
            "#,
        )
        .bind(scheduling_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter().map(OperationRow::into_operation).collect()
    }

    /// Write a new state for one operation, refreshing its `updated` instant.
    pub async fn update_operation_state(
        &self,
        scheduling_id: &str,
        correlation_id: &str,
        state: OperationState,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET state = $3, updated = $4
            WHERE scheduling_id = $1 AND correlation_id = $2
            "#,
        )
        .bind(scheduling_id)
        .bind(correlation_id)
        .bind(state.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                scheduling_id = %scheduling_id,
                correlation_id = %correlation_id,
                error = %e,
                "Failed to update operation state"
            );
            DbError::Query(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(DbError::OperationNotFound {
                scheduling_id: scheduling_id.to_string(),
                correlation_id: correlation_id.to_string(),
            });
        }

        debug!(
            scheduling_id = %scheduling_id,
            correlation_id = %correlation_id,
            state = %state,
            "Updated operation state"
        );
        Ok(())
    }

    /// Flip stalled operations to orphan, returning how many changed.
    ///
    /// Only rows still in progress transition; an operation whose worker
    /// reported in after detection keeps its newer state.
    pub async fn mark_orphans(
        &self,
        scheduling_id: &str,
        correlation_ids: &[String],
    ) -> Result<u64, DbError> {
        if correlation_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE operations
            SET state = $3, updated = $4
            WHERE scheduling_id = $1
              AND correlation_id = ANY($2)
              AND state = $5
            "#,
        )
        .bind(scheduling_id)
        .bind(correlation_ids)
        .bind(OperationState::Orphan.as_str())
        .bind(Utc::now())
        .bind(OperationState::InProgress.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    /// Persist the aggregate status derived for an attempt.
    pub async fn update_cluster_status(
        &self,
        scheduling_id: &str,
        status: ClusterStatus,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE reconciliations
            SET status = $2, updated = $3
            WHERE scheduling_id = $1
            "#,
        )
        .bind(scheduling_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(DbError::ReconciliationNotFound(scheduling_id.to_string()));
        }
        Ok(())
    }

    /// Close out an attempt with its terminal status.
    ///
    /// Returns false when the attempt was already finished; finishing twice
    /// is not an error.
    pub async fn finish_reconciliation(
        &self,
        scheduling_id: &str,
        status: ClusterStatus,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE reconciliations
            SET status = $2, finished = TRUE, updated = $3
            WHERE scheduling_id = $1 AND NOT finished
            "#,
        )
        .bind(scheduling_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let finished = result.rows_affected() > 0;
        if finished {
            debug!(
                scheduling_id = %scheduling_id,
                status = %status,
                "Finished reconciliation"
            );
        }
        Ok(finished)
    }
}
