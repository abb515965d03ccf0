//! Reconciliation result evaluation.
//!
//! A `ReconciliationResult` collects the operations of one scheduling id,
//! derives the aggregate cluster status from them, and detects stalled
//! operations. It is a plain in-memory working copy: one reconciliation loop
//! owns one instance, nothing here suspends or persists.

use std::time::Duration;

use chrono::Utc;
use fleet_model::{ClusterStatus, Operation, OperationState, OperationType, Reconciliation};
use thiserror::Error;
use tracing::debug;

use super::status::StatusTally;

/// Structural defects in submitted operations.
#[derive(Debug, Error)]
pub enum ResultError {
    /// An operation arrived without a correlation id.
    #[error("operation without correlation id in scheduling id '{0}'")]
    MissingCorrelationId(String),
}

/// Aggregated view over the operations of one reconciliation attempt.
pub struct ReconciliationResult {
    runtime_id: String,
    scheduling_id: String,
    operations: Vec<Operation>,
    status: ClusterStatus,
}

impl ReconciliationResult {
    /// Create an empty result for one attempt.
    ///
    /// The cached status starts as the attempt's persisted status and is
    /// recomputed whenever operations are ingested.
    pub fn new(reconciliation: &Reconciliation) -> Self {
        Self {
            runtime_id: reconciliation.runtime_id.clone(),
            scheduling_id: reconciliation.scheduling_id.clone(),
            operations: Vec::new(),
            status: reconciliation.status,
        }
    }

    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    pub fn scheduling_id(&self) -> &str {
        &self.scheduling_id
    }

    /// Ingest operations and recompute the cached status.
    ///
    /// Operations carrying a different scheduling id belong to another
    /// attempt and are silently dropped (logged at debug) before any
    /// validation; only the accepted set is checked for structural defects.
    pub fn add_operations(&mut self, operations: &[Operation]) -> Result<(), ResultError> {
        for op in operations {
            if op.scheduling_id != self.scheduling_id {
                debug!(
                    scheduling_id = %self.scheduling_id,
                    foreign_scheduling_id = %op.scheduling_id,
                    correlation_id = %op.correlation_id,
                    "Dropping operation of a different reconciliation attempt"
                );
                continue;
            }
            if op.correlation_id.is_empty() {
                return Err(ResultError::MissingCorrelationId(op.scheduling_id.clone()));
            }
            self.operations.push(op.clone());
        }

        if !self.operations.is_empty() {
            self.status = StatusTally::of(&self.operations).cluster_status(self.operation_type());
        }
        Ok(())
    }

    /// The accumulated operations, in submission order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The cached aggregate cluster status.
    pub fn status(&self) -> ClusterStatus {
        self.status
    }

    /// Operations believed in progress whose worker stopped reporting.
    ///
    /// Returns every operation still `inprogress` whose last update is older
    /// than `threshold`. Detection is pure: the caller persists the orphan
    /// transition.
    pub fn orphans(&self, threshold: Duration) -> Vec<&Operation> {
        let now = Utc::now();
        self.operations
            .iter()
            .filter(|op| op.state == OperationState::InProgress)
            .filter(|op| {
                (now - op.updated)
                    .to_std()
                    .map(|age| age > threshold)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Delete mode only when every operation is a delete; the scheduler
    /// registers homogeneous attempts, so a mixed set means reconcile.
    fn operation_type(&self) -> OperationType {
        if !self.operations.is_empty()
            && self
                .operations
                .iter()
                .all(|op| op.op_type == OperationType::Delete)
        {
            OperationType::Delete
        } else {
            OperationType::Reconcile
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use fleet_model::OperationState;

    const SCHEDULING_ID: &str = "scheduling-1";

    struct Scenario {
        operations: Vec<Operation>,
        expected_reconcile: ClusterStatus,
        expected_delete: ClusterStatus,
        expected_orphans: &'static [&'static str],
    }

    fn reconciliation() -> Reconciliation {
        Reconciliation {
            runtime_id: "runtime-1".to_string(),
            scheduling_id: SCHEDULING_ID.to_string(),
            status: ClusterStatus::Reconciling,
            finished: false,
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    fn op(correlation_id: &str, state: OperationState, updated: DateTime<Utc>) -> Operation {
        Operation {
            priority: 1,
            runtime_id: "runtime-1".to_string(),
            scheduling_id: SCHEDULING_ID.to_string(),
            correlation_id: correlation_id.to_string(),
            op_type: OperationType::Reconcile,
            state,
            updated,
        }
    }

    fn scenarios() -> Vec<Scenario> {
        let now = Utc::now();
        let ms = chrono::Duration::milliseconds;
        vec![
            Scenario {
                operations: vec![op("1.1", OperationState::New, now - ms(1999))],
                expected_reconcile: ClusterStatus::Reconciling,
                expected_delete: ClusterStatus::Deleting,
                expected_orphans: &[],
            },
            Scenario {
                operations: vec![
                    op("1.1", OperationState::New, now - ms(1999)),
                    op("1.2", OperationState::Error, now - ms(2000)),
                    op("1.3", OperationState::InProgress, now - ms(2001)),
                ],
                expected_reconcile: ClusterStatus::Reconciling,
                expected_delete: ClusterStatus::Deleting,
                expected_orphans: &["1.3"],
            },
            Scenario {
                operations: vec![
                    op("1.1", OperationState::New, now),
                    op("1.2", OperationState::Error, now),
                    op("1.3", OperationState::Orphan, now),
                    op("1.4", OperationState::Done, now),
                ],
                expected_reconcile: ClusterStatus::ReconcileError,
                expected_delete: ClusterStatus::DeleteError,
                expected_orphans: &[],
            },
            // A stale failed operation is terminal, not orphaned: orphan
            // detection fires on inprogress operations only.
            Scenario {
                operations: vec![
                    op("1.1", OperationState::Failed, now - chrono::Duration::seconds(3)),
                    op("1.2", OperationState::New, now),
                    op("1.3", OperationState::InProgress, now),
                ],
                expected_reconcile: ClusterStatus::Reconciling,
                expected_delete: ClusterStatus::Deleting,
                expected_orphans: &[],
            },
            Scenario {
                operations: vec![
                    op("1.1", OperationState::Done, now),
                    op("1.2", OperationState::Done, now),
                    op("1.3", OperationState::InProgress, now),
                ],
                expected_reconcile: ClusterStatus::Reconciling,
                expected_delete: ClusterStatus::Deleting,
                expected_orphans: &[],
            },
            Scenario {
                operations: vec![
                    op("1.1", OperationState::Error, now),
                    op("2.1", OperationState::Error, now),
                    op("1.2", OperationState::InProgress, now),
                ],
                expected_reconcile: ClusterStatus::Reconciling,
                expected_delete: ClusterStatus::Deleting,
                expected_orphans: &[],
            },
            Scenario {
                operations: vec![
                    op("1.1", OperationState::Error, now),
                    op("2.1", OperationState::Error, now),
                    op("1.2", OperationState::New, now),
                ],
                expected_reconcile: ClusterStatus::ReconcileError,
                expected_delete: ClusterStatus::DeleteError,
                expected_orphans: &[],
            },
            Scenario {
                operations: vec![
                    op("1.1", OperationState::Done, now),
                    op("1.2", OperationState::Done, now),
                ],
                expected_reconcile: ClusterStatus::Ready,
                expected_delete: ClusterStatus::Deleted,
                expected_orphans: &[],
            },
            Scenario {
                operations: vec![
                    op("1.2", OperationState::Done, now),
                    op("1.1", OperationState::Error, now),
                ],
                expected_reconcile: ClusterStatus::ReconcileError,
                expected_delete: ClusterStatus::DeleteError,
                expected_orphans: &[],
            },
            Scenario {
                operations: vec![
                    op("1.1", OperationState::Error, now),
                    op("1.2", OperationState::Error, now),
                ],
                expected_reconcile: ClusterStatus::ReconcileError,
                expected_delete: ClusterStatus::DeleteError,
                expected_orphans: &[],
            },
        ]
    }

    #[test]
    fn test_reconcile_status_and_orphans() {
        for (i, scenario) in scenarios().into_iter().enumerate() {
            let mut result = ReconciliationResult::new(&reconciliation());
            result
                .add_operations(&scenario.operations)
                .expect("well-formed operations");

            assert_eq!(
                result.status(),
                scenario.expected_reconcile,
                "scenario {i}"
            );
            assert_eq!(result.operations().len(), scenario.operations.len());

            let mut orphans: Vec<&str> = result
                .orphans(Duration::from_secs(1))
                .into_iter()
                .map(|op| op.correlation_id.as_str())
                .collect();
            orphans.sort_unstable();
            assert_eq!(orphans, scenario.expected_orphans, "scenario {i}");
        }
    }

    #[test]
    fn test_delete_status() {
        for (i, scenario) in scenarios().into_iter().enumerate() {
            let delete_ops: Vec<Operation> = scenario
                .operations
                .iter()
                .cloned()
                .map(|mut op| {
                    op.op_type = OperationType::Delete;
                    op
                })
                .collect();

            let mut result = ReconciliationResult::new(&reconciliation());
            result
                .add_operations(&delete_ops)
                .expect("well-formed operations");
            assert_eq!(result.status(), scenario.expected_delete, "scenario {i}");
        }
    }

    #[test]
    fn test_foreign_scheduling_id_is_dropped() {
        let now = Utc::now();
        let mut foreign = op("2.1", OperationState::Error, now);
        foreign.scheduling_id = "scheduling-other".to_string();

        let mut result = ReconciliationResult::new(&reconciliation());
        result
            .add_operations(&[op("1.1", OperationState::Done, now), foreign])
            .expect("well-formed operations");

        assert_eq!(result.operations().len(), 1);
        assert_eq!(result.status(), ClusterStatus::Ready);
    }

    #[test]
    fn test_foreign_operation_is_dropped_before_validation() {
        let now = Utc::now();
        // Structurally broken, but for another attempt: dropped, not an error.
        let mut foreign = op("", OperationState::Error, now);
        foreign.scheduling_id = "scheduling-other".to_string();

        let mut result = ReconciliationResult::new(&reconciliation());
        result
            .add_operations(&[op("1.1", OperationState::Done, now), foreign])
            .expect("foreign operations are dropped before validation");

        assert_eq!(result.operations().len(), 1);
        assert_eq!(result.status(), ClusterStatus::Ready);
    }

    #[test]
    fn test_missing_correlation_id_is_structural() {
        let invalid = op("", OperationState::New, Utc::now());

        let mut result = ReconciliationResult::new(&reconciliation());
        assert!(matches!(
            result.add_operations(&[invalid]),
            Err(ResultError::MissingCorrelationId(_))
        ));
    }

    #[test]
    fn test_mixed_types_evaluate_in_reconcile_mode() {
        let now = Utc::now();
        let mut delete_op = op("1.2", OperationState::Done, now);
        delete_op.op_type = OperationType::Delete;

        let mut result = ReconciliationResult::new(&reconciliation());
        result
            .add_operations(&[op("1.1", OperationState::Done, now), delete_op])
            .expect("well-formed operations");
        assert_eq!(result.status(), ClusterStatus::Ready);
    }

    #[test]
    fn test_empty_result_keeps_attempt_status() {
        let result = ReconciliationResult::new(&reconciliation());
        assert_eq!(result.status(), ClusterStatus::Reconciling);
        assert!(result.operations().is_empty());
        assert!(result.orphans(Duration::from_secs(1)).is_empty());
    }
}
