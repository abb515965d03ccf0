//! Database error types.

use thiserror::Error;

/// Database operation errors.
///
/// Only backend failures (`Connect`, `Query`) are candidates for caller-side
/// retry; everything else carries enough context to be reported upward as-is.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// No occupancy row for the given worker pool.
    #[error("worker pool occupancy not found: {0}")]
    OccupancyNotFound(String),

    /// The occupancy registry holds no rows at all.
    ///
    /// Callers treat an empty registry as exceptional: a dispatcher always
    /// expects at least its own pool to be registered.
    #[error("no worker pool occupancies registered")]
    NoOccupancies,

    /// No occupancy rows for the given component tag.
    #[error("no worker pool occupancies for component: {0}")]
    ComponentNotFound(String),

    /// Worker pool id collision on create.
    #[error("worker pool occupancy already registered: {0}")]
    PoolAlreadyRegistered(String),

    /// Attempted to persist more running workers than the pool can hold.
    #[error(
        "running workers exceed capacity of worker pool '{worker_pool_id}' \
         (running: {running_workers}, capacity: {capacity})"
    )]
    CapacityExceeded {
        worker_pool_id: String,
        running_workers: i64,
        capacity: i64,
    },

    /// Worker pool capacity must be at least one.
    #[error("invalid capacity {capacity} for worker pool '{worker_pool_id}'")]
    InvalidCapacity {
        worker_pool_id: String,
        capacity: i64,
    },

    /// Scheduling id collision when registering a reconciliation.
    #[error("reconciliation already registered for scheduling id: {0}")]
    SchedulingIdInUse(String),

    /// No reconciliation row for the given scheduling id.
    #[error("reconciliation not found: {0}")]
    ReconciliationNotFound(String),

    /// No operation row for the given (scheduling id, correlation id).
    #[error("operation not found: {scheduling_id}/{correlation_id}")]
    OperationNotFound {
        scheduling_id: String,
        correlation_id: String,
    },

    /// A persisted enum string no release of the reconciler ever wrote.
    #[error("corrupt row: {0}")]
    CorruptRow(#[from] fleet_model::UnknownValueError),
}

impl DbError {
    /// Check if this is a retryable error.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Connect(_) => true,
            DbError::Query(e) => is_retryable_sqlx_error(e),
            _ => false,
        }
    }
}

fn is_retryable_sqlx_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            // Postgres error codes that are retryable
            if let Some(code) = db_err.code() {
                matches!(
                    code.as_ref(),
                    "40001" | // serialization_failure
                    "40P01" | // deadlock_detected
                    "57P01" | // admin_shutdown
                    "57P02" | // crash_shutdown
                    "57P03"   // cannot_connect_now
                )
            } else {
                false
            }
        }
        _ => false,
    }
}

/// True if the error is a Postgres unique-constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_backend_errors_retry() {
        assert!(DbError::Connect(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(DbError::Query(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!DbError::NoOccupancies.is_retryable());
        assert!(!DbError::CapacityExceeded {
            worker_pool_id: "pool-1".to_string(),
            running_workers: 5,
            capacity: 4,
        }
        .is_retryable());
    }
}
