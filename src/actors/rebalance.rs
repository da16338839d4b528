//! Rebalance actor running the periodic steal pass and maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::orchestration::WorkStealingCoordinator;

use super::ActorHandle;

const STEAL_INTERVAL: Duration = Duration::from_secs(5);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Actor that periodically asks the coordinator to rebalance.
pub struct RebalanceActor {
    coordinator: Arc<WorkStealingCoordinator>,
    interval: Duration,
    maintenance_interval: Duration,
}

impl RebalanceActor {
    pub fn new(coordinator: Arc<WorkStealingCoordinator>) -> Self {
        Self {
            coordinator,
            interval: STEAL_INTERVAL,
            maintenance_interval: MAINTENANCE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn spawn(self) -> ActorHandle {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        debug!(interval_ms = self.interval.as_millis() as u64, "RebalanceActor::spawn");

        let join = tokio::spawn(async move {
            let mut steal_tick = tokio::time::interval(self.interval);
            steal_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut maintenance_tick = tokio::time::interval(self.maintenance_interval);
            maintenance_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("RebalanceActor cancelled");
                        break;
                    }
                    _ = steal_tick.tick() => {
                        match self.coordinator.check_and_steal().await {
                            Some(ops) if !ops.is_empty() => {
                                debug!(operations = ops.len(), "Rebalance pass finished");
                            }
                            Some(_) => trace!("Rebalance pass found nothing to move"),
                            None => trace!("Rebalance pass skipped"),
                        }
                    }
                    _ = maintenance_tick.tick() => {
                        self.coordinator.run_maintenance().await;
                    }
                }
            }
        });

        ActorHandle::new(cancel, join)
    }
}
