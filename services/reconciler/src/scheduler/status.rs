//! Decision matrix mapping an attempt's operation states to a cluster status.

use fleet_model::{ClusterStatus, Operation, OperationState, OperationType};

/// Tally of one attempt's operations by status-relevant class.
///
/// `orphan` and `client_error` operations count toward the total only: they
/// block the all-done rule but neither hold an attempt in-flight nor force an
/// error on their own.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusTally {
    total: usize,
    done: usize,
    terminal_bad: usize,
    pending: usize,
    running: usize,
}

impl StatusTally {
    pub fn of(operations: &[Operation]) -> Self {
        let mut tally = StatusTally::default();
        for op in operations {
            tally.total += 1;
            match op.state {
                OperationState::Done => tally.done += 1,
                OperationState::Error | OperationState::Failed => tally.terminal_bad += 1,
                OperationState::New => tally.pending += 1,
                OperationState::InProgress => tally.running += 1,
                OperationState::Orphan | OperationState::ClientError => {}
            }
        }
        tally
    }

    /// Apply the decision rules, top to bottom, first match wins:
    ///
    /// 1. every operation done             => success
    /// 2. any failure, nothing pending,
    ///    nothing running                  => error
    /// 3. any failure, something pending,
    ///    nothing running                  => error
    /// 4. otherwise                        => in-flight
    ///
    /// An attempt stays in-flight as long as at least one operation can still
    /// make progress; failures become terminal only once the pipeline has
    /// quiesced.
    pub fn cluster_status(&self, op_type: OperationType) -> ClusterStatus {
        if self.done == self.total {
            return op_type.success_status();
        }
        if self.terminal_bad > 0 && self.pending == 0 && self.running == 0 {
            return op_type.error_status();
        }
        if self.terminal_bad > 0 && self.pending > 0 && self.running == 0 {
            return op_type.error_status();
        }
        op_type.in_flight_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_model::OperationState;

    fn op(state: OperationState) -> Operation {
        Operation {
            priority: 1,
            runtime_id: "runtime".to_string(),
            scheduling_id: "scheduling".to_string(),
            correlation_id: "1.1".to_string(),
            op_type: OperationType::Reconcile,
            state,
            updated: Utc::now(),
        }
    }

    #[test]
    fn test_orphans_alone_keep_attempt_in_flight() {
        let ops = vec![op(OperationState::Orphan), op(OperationState::Done)];
        let tally = StatusTally::of(&ops);
        assert_eq!(
            tally.cluster_status(OperationType::Reconcile),
            ClusterStatus::Reconciling
        );
    }

    #[test]
    fn test_failure_with_running_peer_stays_in_flight() {
        let ops = vec![op(OperationState::Failed), op(OperationState::InProgress)];
        let tally = StatusTally::of(&ops);
        assert_eq!(
            tally.cluster_status(OperationType::Delete),
            ClusterStatus::Deleting
        );
    }

    #[test]
    fn test_failure_with_pending_peer_quiesces_to_error() {
        let ops = vec![op(OperationState::Failed), op(OperationState::New)];
        let tally = StatusTally::of(&ops);
        assert_eq!(
            tally.cluster_status(OperationType::Reconcile),
            ClusterStatus::ReconcileError
        );
    }
}
