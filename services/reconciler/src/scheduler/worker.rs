//! Bookkeeper background worker.
//!
//! Runs the result-evaluation loop on a periodic interval: for every
//! unfinished reconciliation it derives the aggregate cluster status, marks
//! stalled operations as orphans, and closes out attempts that reached a
//! terminal status.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use fleet_model::Reconciliation;

use crate::db::{DbError, OperationsStore};

use super::result::{ReconciliationResult, ResultError};

/// Errors from one bookkeeping pass.
#[derive(Debug, Error)]
pub enum BookkeeperError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("result evaluation error: {0}")]
    Result(#[from] ResultError),
}

/// Statistics from one bookkeeping pass.
#[derive(Debug, Default, Clone)]
pub struct PassStats {
    pub attempts_processed: i32,
    pub attempts_failed: i32,
    pub orphans_marked: u64,
    pub attempts_finished: i32,
}

/// Bookkeeper worker that evaluates reconciliation results.
pub struct BookkeeperWorker {
    operations: OperationsStore,
    orphan_timeout: Duration,
    interval: Duration,
}

impl BookkeeperWorker {
    /// Create a new bookkeeper worker.
    pub fn new(operations: OperationsStore, orphan_timeout: Duration, interval: Duration) -> Self {
        Self {
            operations,
            orphan_timeout,
            interval,
        }
    }

    /// Run the bookkeeper until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            orphan_timeout_secs = self.orphan_timeout.as_secs(),
            "Starting bookkeeper worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_pass().await {
                        Ok(stats) => {
                            if stats.orphans_marked > 0 || stats.attempts_finished > 0 {
                                info!(
                                    attempts_processed = stats.attempts_processed,
                                    orphans_marked = stats.orphans_marked,
                                    attempts_finished = stats.attempts_finished,
                                    "Bookkeeping pass complete"
                                );
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Bookkeeping pass failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Bookkeeper worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single bookkeeping pass over all unfinished reconciliations.
    ///
    /// A failing attempt is logged and skipped; it never aborts the pass.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> Result<PassStats, BookkeeperError> {
        let mut stats = PassStats::default();

        let reconciliations = self.operations.unfinished_reconciliations().await?;
        for reconciliation in reconciliations {
            match self.settle(&reconciliation).await {
                Ok((orphans, finished)) => {
                    stats.attempts_processed += 1;
                    stats.orphans_marked += orphans;
                    if finished {
                        stats.attempts_finished += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        runtime_id = %reconciliation.runtime_id,
                        scheduling_id = %reconciliation.scheduling_id,
                        error = %e,
                        "Failed to settle reconciliation"
                    );
                    stats.attempts_failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Evaluate one attempt: mark orphans, persist the derived status,
    /// finish the attempt when the status is terminal.
    #[instrument(
        skip(self, reconciliation),
        fields(
            runtime_id = %reconciliation.runtime_id,
            scheduling_id = %reconciliation.scheduling_id,
        )
    )]
    async fn settle(
        &self,
        reconciliation: &Reconciliation,
    ) -> Result<(u64, bool), BookkeeperError> {
        let operations = self
            .operations
            .get_operations(&reconciliation.scheduling_id)
            .await?;

        let mut result = ReconciliationResult::new(reconciliation);
        result.add_operations(&operations)?;

        let orphan_ids: Vec<String> = result
            .orphans(self.orphan_timeout)
            .into_iter()
            .map(|op| op.correlation_id.clone())
            .collect();

        let mut orphans_marked = 0;
        if !orphan_ids.is_empty() {
            orphans_marked = self
                .operations
                .mark_orphans(&reconciliation.scheduling_id, &orphan_ids)
                .await?;
            info!(
                runtime_id = %reconciliation.runtime_id,
                scheduling_id = %reconciliation.scheduling_id,
                orphans = orphans_marked,
                "Marked stalled operations as orphans"
            );
        }

        let status = result.status();
        if status.is_terminal() {
            let finished = self
                .operations
                .finish_reconciliation(&reconciliation.scheduling_id, status)
                .await?;
            return Ok((orphans_marked, finished));
        }

        if status != reconciliation.status {
            self.operations
                .update_cluster_status(&reconciliation.scheduling_id, status)
                .await?;
        }
        Ok((orphans_marked, false))
    }
}
