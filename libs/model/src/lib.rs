//! Shared domain model for the fleet reconciler.
//!
//! Value types for reconciliation attempts, their component operations, and
//! worker-pool occupancy rows, plus the state enumerations with their
//! wire-stable string values. These strings are persisted and must never
//! change meaning across releases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing a persisted enum string fails.
///
/// This is bug-class: it means the database holds a value no release of the
/// reconciler ever wrote.
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownValueError {
    pub kind: &'static str,
    pub value: String,
}

/// State of a single component operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    New,
    #[serde(rename = "inprogress")]
    InProgress,
    Done,
    Error,
    Failed,
    Orphan,
    ClientError,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::New => "new",
            OperationState::InProgress => "inprogress",
            OperationState::Done => "done",
            OperationState::Error => "error",
            OperationState::Failed => "failed",
            OperationState::Orphan => "orphan",
            OperationState::ClientError => "client_error",
        }
    }

    /// Terminal states permit no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Done | OperationState::Error | OperationState::Failed
        )
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = UnknownValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OperationState::New),
            "inprogress" => Ok(OperationState::InProgress),
            "done" => Ok(OperationState::Done),
            "error" => Ok(OperationState::Error),
            "failed" => Ok(OperationState::Failed),
            "orphan" => Ok(OperationState::Orphan),
            "client_error" => Ok(OperationState::ClientError),
            other => Err(UnknownValueError {
                kind: "operation state",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of work an operation performs against its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    #[default]
    Reconcile,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Reconcile => "reconcile",
            OperationType::Delete => "delete",
        }
    }

    /// Cluster status when every operation of this type finished cleanly.
    pub fn success_status(&self) -> ClusterStatus {
        match self {
            OperationType::Reconcile => ClusterStatus::Ready,
            OperationType::Delete => ClusterStatus::Deleted,
        }
    }

    /// Cluster status when the attempt quiesced with failures.
    pub fn error_status(&self) -> ClusterStatus {
        match self {
            OperationType::Reconcile => ClusterStatus::ReconcileError,
            OperationType::Delete => ClusterStatus::DeleteError,
        }
    }

    /// Cluster status while operations can still make progress.
    pub fn in_flight_status(&self) -> ClusterStatus {
        match self {
            OperationType::Reconcile => ClusterStatus::Reconciling,
            OperationType::Delete => ClusterStatus::Deleting,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = UnknownValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reconcile" => Ok(OperationType::Reconcile),
            "delete" => Ok(OperationType::Delete),
            other => Err(UnknownValueError {
                kind: "operation type",
                value: other.to_string(),
            }),
        }
    }
}

/// Aggregate status of a cluster's reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Reconciling,
    Ready,
    ReconcileError,
    Deleting,
    Deleted,
    DeleteError,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Reconciling => "reconciling",
            ClusterStatus::Ready => "ready",
            ClusterStatus::ReconcileError => "reconcile_error",
            ClusterStatus::Deleting => "deleting",
            ClusterStatus::Deleted => "deleted",
            ClusterStatus::DeleteError => "delete_error",
        }
    }

    /// A terminal status ends the attempt; the bookkeeper stops tracking it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClusterStatus::Ready
                | ClusterStatus::Deleted
                | ClusterStatus::ReconcileError
                | ClusterStatus::DeleteError
        )
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = UnknownValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reconciling" => Ok(ClusterStatus::Reconciling),
            "ready" => Ok(ClusterStatus::Ready),
            "reconcile_error" => Ok(ClusterStatus::ReconcileError),
            "deleting" => Ok(ClusterStatus::Deleting),
            "deleted" => Ok(ClusterStatus::Deleted),
            "delete_error" => Ok(ClusterStatus::DeleteError),
            other => Err(UnknownValueError {
                kind: "cluster status",
                value: other.to_string(),
            }),
        }
    }
}

/// One unit of work within a reconciliation attempt.
///
/// `(scheduling_id, correlation_id)` is unique; `updated` is refreshed on
/// every state write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub priority: i64,
    pub runtime_id: String,
    pub scheduling_id: String,
    pub correlation_id: String,
    pub op_type: OperationType,
    pub state: OperationState,
    pub updated: DateTime<Utc>,
}

/// One pass at driving a cluster from observed to desired state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub runtime_id: String,
    pub scheduling_id: String,
    pub status: ClusterStatus,
    pub finished: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Registered worker pool with its capacity and instantaneous usage.
///
/// `running_workers <= worker_pool_capacity` holds on every persisted row;
/// capacity is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolOccupancy {
    pub worker_pool_id: String,
    pub component: String,
    pub worker_pool_capacity: i64,
    pub running_workers: i64,
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_strings() {
        assert_eq!(OperationState::InProgress.as_str(), "inprogress");
        assert_eq!(OperationState::ClientError.as_str(), "client_error");
        assert_eq!(
            "inprogress".parse::<OperationState>().unwrap(),
            OperationState::InProgress
        );
        assert!("in_progress".parse::<OperationState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(OperationState::Done.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(!OperationState::Orphan.is_terminal());
        assert!(!OperationState::ClientError.is_terminal());
    }

    #[test]
    fn test_status_by_operation_type() {
        assert_eq!(
            OperationType::Reconcile.success_status(),
            ClusterStatus::Ready
        );
        assert_eq!(
            OperationType::Delete.error_status(),
            ClusterStatus::DeleteError
        );
        assert!(ClusterStatus::DeleteError.is_terminal());
        assert!(!ClusterStatus::Deleting.is_terminal());
    }
}
