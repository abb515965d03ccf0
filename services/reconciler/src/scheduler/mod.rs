//! Scheduler-side evaluation and back-pressure.
//!
//! The scheduler is responsible for:
//! - Deriving the aggregate cluster status of each reconciliation attempt
//! - Detecting and marking stalled (orphan) operations
//! - Throttling dispatch on worker-pool occupancy aggregates

mod dispatch;
mod result;
mod status;
mod worker;

pub use dispatch::DispatchGate;
pub use result::{ReconciliationResult, ResultError};
pub use status::StatusTally;
pub use worker::{BookkeeperError, BookkeeperWorker, PassStats};
