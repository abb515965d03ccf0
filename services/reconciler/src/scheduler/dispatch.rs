//! Dispatcher-side occupancy bookkeeping and back-pressure gate.
//!
//! Every dispatcher owns one occupancy row per worker pool: it registers the
//! pool at startup, reports running-worker counts while working, and releases
//! the row on shutdown. Before scheduling more operations of a component the
//! dispatcher asks the gate whether the component's aggregate occupancy is
//! still below the configured high-water mark.

use fleet_model::WorkerPoolOccupancy;
use tracing::{debug, info, instrument, warn};

use crate::db::{DbError, OccupancyStore};

/// Occupancy gate for one dispatcher.
#[derive(Clone)]
pub struct DispatchGate {
    occupancy: OccupancyStore,
    high_water_mark: f64,
}

impl DispatchGate {
    /// Create a gate over the occupancy registry.
    ///
    /// `high_water_mark` is a percentage in [0, 100]; a component at or above
    /// it is considered saturated.
    pub fn new(occupancy: OccupancyStore, high_water_mark: f64) -> Self {
        Self {
            occupancy,
            high_water_mark,
        }
    }

    /// Register this dispatcher's worker pool.
    #[instrument(skip(self))]
    pub async fn register_pool(
        &self,
        worker_pool_id: &str,
        component: &str,
        capacity: i64,
    ) -> Result<WorkerPoolOccupancy, DbError> {
        self.occupancy
            .create_worker_pool_occupancy(worker_pool_id, component, capacity)
            .await
    }

    /// Report the pool's current running-worker count.
    #[instrument(skip(self))]
    pub async fn report_running_workers(
        &self,
        worker_pool_id: &str,
        running_workers: i64,
    ) -> Result<(), DbError> {
        self.occupancy
            .update_worker_pool_occupancy(worker_pool_id, running_workers)
            .await
    }

    /// Remove the pool's occupancy row on shutdown.
    #[instrument(skip(self))]
    pub async fn release_pool(&self, worker_pool_id: &str) -> Result<(), DbError> {
        let removed = self
            .occupancy
            .remove_worker_pool_occupancy(worker_pool_id)
            .await?;
        info!(
            worker_pool_id = %worker_pool_id,
            removed,
            "Released worker pool occupancy"
        );
        Ok(())
    }

    /// Whether more operations of a component may be dispatched.
    ///
    /// A component with no registered pools is dispatchable: the first pool
    /// registers itself as part of picking up work.
    #[instrument(skip(self))]
    pub async fn can_dispatch(&self, component: &str) -> Result<bool, DbError> {
        let mean = match self.occupancy.mean_occupancy_by_component(component).await {
            Ok(mean) => mean,
            Err(DbError::ComponentNotFound(_)) => return Ok(true),
            Err(e) => return Err(e),
        };

        if is_saturated(mean, self.high_water_mark) {
            warn!(
                component = %component,
                mean_occupancy = mean,
                high_water_mark = self.high_water_mark,
                "Component saturated, holding back dispatch"
            );
            return Ok(false);
        }

        debug!(component = %component, mean_occupancy = mean, "Component dispatchable");
        Ok(true)
    }
}

fn is_saturated(mean_occupancy: f64, high_water_mark: f64) -> bool {
    mean_occupancy >= high_water_mark
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_boundary() {
        assert!(!is_saturated(79.9, 80.0));
        assert!(is_saturated(80.0, 80.0));
        assert!(is_saturated(100.0, 80.0));
        assert!(!is_saturated(0.0, 80.0));
    }
}
