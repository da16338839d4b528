//! Runtime wiring the bus, scheduler, coordinator and background actors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::actors::{ActorHandle, EventPumpActor, RebalanceActor};
use crate::agent::{AgentId, AgentProfile};
use crate::config::Config;
use crate::core::TaskId;
use crate::error::Result;

use super::events::EventBus;
use super::scheduler::{TaskExecutor, TaskScheduler};
use super::stealing::WorkStealingCoordinator;
use super::workload::AgentWorkload;

const ACTOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running engine instance.
///
/// Components are usable as soon as the `Hive` is built. [`start`](Self::start)
/// adds the background rebalancing and the event pump.
pub struct Hive {
    config: Config,
    bus: Arc<EventBus>,
    scheduler: Arc<TaskScheduler>,
    coordinator: Arc<WorkStealingCoordinator>,
    actors: Mutex<Vec<ActorHandle>>,
}

impl Hive {
    pub fn new(config: Config) -> Self {
        Self::build(config, None)
    }

    /// Build with a task-execution collaborator for rollback aborts.
    pub fn with_executor(config: Config, executor: Arc<dyn TaskExecutor>) -> Self {
        Self::build(config, Some(executor))
    }

    fn build(config: Config, executor: Option<Arc<dyn TaskExecutor>>) -> Self {
        let bus = Arc::new(EventBus::new(config.bus.capacity));
        let mut scheduler = TaskScheduler::new(config.scheduler_config(), bus.clone());
        if let Some(executor) = executor {
            scheduler = scheduler.with_executor(executor);
        }
        let coordinator = WorkStealingCoordinator::new(config.steal_config(), bus.clone());
        Self {
            config,
            bus,
            scheduler: Arc::new(scheduler),
            coordinator: Arc::new(coordinator),
            actors: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &Arc<WorkStealingCoordinator> {
        &self.coordinator
    }

    /// Spawn the event pump and the rebalance actor. Calling it again while
    /// they run does nothing.
    pub async fn start(&self) {
        let mut actors = self.actors.lock().await;
        if !actors.is_empty() {
            return;
        }

        let pump = EventPumpActor::new(
            self.bus.subscribe(),
            self.coordinator.clone(),
            self.scheduler.clone(),
        )
        .with_apply_steals(self.config.bus.apply_steals_locally);
        actors.push(pump.spawn());

        let rebalance = RebalanceActor::new(self.coordinator.clone())
            .with_interval(self.config.steal_interval())
            .with_maintenance_interval(self.config.maintenance_interval());
        actors.push(rebalance.spawn());

        info!(
            steal_interval_ms = self.config.stealing.steal_interval_ms,
            apply_steals_locally = self.config.bus.apply_steals_locally,
            "Hive started"
        );
    }

    pub async fn is_running(&self) -> bool {
        !self.actors.lock().await.is_empty()
    }

    pub async fn register_agent(&self, profile: &AgentProfile) -> AgentWorkload {
        self.coordinator.register_agent(profile).await
    }

    /// Pick an agent for a pending task and assign it.
    ///
    /// Returns `None` when no candidate accepts work.
    pub async fn place_task(
        &self,
        task_id: &TaskId,
        candidates: &[AgentProfile],
    ) -> Result<Option<AgentId>> {
        let task = self.scheduler.get_task(task_id).await?;
        let Some(agent_id) = self.coordinator.find_best_agent(&task, candidates).await else {
            return Ok(None);
        };
        self.scheduler.assign_task(task_id, agent_id.clone()).await?;
        Ok(Some(agent_id))
    }

    /// Stop accepting submissions and stop every actor.
    ///
    /// Steal operations in flight keep whatever state they reached.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown();
        let actors: Vec<ActorHandle> = self.actors.lock().await.drain(..).collect();
        let mut first_error = None;
        for actor in actors {
            if let Err(e) = actor.stop(ACTOR_STOP_TIMEOUT).await {
                warn!(error = %e, "Actor did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }
        info!("Hive stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Hive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hive")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
