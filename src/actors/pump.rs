//! Event pump actor feeding bus events into the coordinator.
//!
//! Lifecycle events and telemetry keep the coordinator's workloads current.
//! When local placement is enabled, `work:steal` decisions are applied to
//! the scheduler's assignments and the moved tasks reported back.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestration::{HiveEvent, TaskScheduler, WorkStealingCoordinator};

use super::ActorHandle;

/// Actor draining one bus subscription.
pub struct EventPumpActor {
    rx: broadcast::Receiver<HiveEvent>,
    coordinator: Arc<WorkStealingCoordinator>,
    scheduler: Arc<TaskScheduler>,
    apply_steals: bool,
}

impl EventPumpActor {
    /// The receiver must be subscribed before anything publishes, so it is
    /// taken here rather than created in `spawn`.
    pub fn new(
        rx: broadcast::Receiver<HiveEvent>,
        coordinator: Arc<WorkStealingCoordinator>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            rx,
            coordinator,
            scheduler,
            apply_steals: true,
        }
    }

    pub fn with_apply_steals(mut self, apply: bool) -> Self {
        self.apply_steals = apply;
        self
    }

    pub fn spawn(mut self) -> ActorHandle {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        debug!(apply_steals = self.apply_steals, "EventPumpActor::spawn");

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("EventPumpActor cancelled");
                        break;
                    }
                    received = self.rx.recv() => {
                        match received {
                            Ok(event) => self.dispatch(event).await,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Event pump lagged, workloads may drift until next telemetry");
                            }
                            Err(RecvError::Closed) => {
                                debug!("EventPumpActor: bus closed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        ActorHandle::new(cancel, join)
    }

    async fn dispatch(&self, event: HiveEvent) {
        if let Err(e) = self.coordinator.handle_event(&event).await {
            warn!(event = event.name(), error = %e, "Ignoring event");
            return;
        }

        let HiveEvent::WorkSteal {
            operation_id,
            source_agent_id,
            target_agent_id,
            tasks_to_steal,
            ..
        } = event
        else {
            return;
        };
        if !self.apply_steals {
            return;
        }

        let capabilities = match self.coordinator.get_workload(&target_agent_id).await {
            Ok(workload) => workload.capabilities,
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "Steal target vanished");
                Default::default()
            }
        };
        let moved = self
            .scheduler
            .reassign_tasks(&source_agent_id, &target_agent_id, tasks_to_steal, &capabilities)
            .await;
        let moved_count = moved.len();
        match self.coordinator.confirm_steal(&operation_id, moved).await {
            Ok(_) => info!(
                operation_id = %operation_id,
                planned = tasks_to_steal,
                moved = moved_count,
                "Applied work steal"
            ),
            Err(e) => warn!(operation_id = %operation_id, error = %e, "Could not confirm steal"),
        }
    }
}
