//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building a scheduler and coordinator on one event bus
//! - Recording sinks and executor doubles
//! - Polling for asynchronous state changes

use std::future::Future;
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use hive::agent::{AgentId, AgentProfile};
use hive::core::{Task, TaskId, TaskSpec};
use hive::orchestration::{
    EventBus, EventSink, HiveEvent, SchedulerConfig, StealConfig, TaskExecutor, TaskScheduler,
    WorkStealingCoordinator,
};
use hive::{Error, Result};

/// Scheduler and coordinator sharing an event bus, with one subscription
/// held open so publishing always has a listener.
pub struct Harness {
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<TaskScheduler>,
    pub coordinator: Arc<WorkStealingCoordinator>,
    pub rx: broadcast::Receiver<HiveEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default(), StealConfig::default())
    }

    pub fn with_config(scheduler: SchedulerConfig, stealing: StealConfig) -> Self {
        let bus = Arc::new(EventBus::default());
        let rx = bus.subscribe();
        Self {
            scheduler: Arc::new(TaskScheduler::new(scheduler, bus.clone())),
            coordinator: Arc::new(WorkStealingCoordinator::new(stealing, bus.clone())),
            bus,
            rx,
        }
    }

    pub fn with_executor(executor: Arc<dyn TaskExecutor>) -> Self {
        let bus = Arc::new(EventBus::default());
        let rx = bus.subscribe();
        let scheduler = TaskScheduler::new(SchedulerConfig::default(), bus.clone())
            .with_executor(executor);
        Self {
            scheduler: Arc::new(scheduler),
            coordinator: Arc::new(WorkStealingCoordinator::new(StealConfig::default(), bus.clone())),
            bus,
            rx,
        }
    }

    /// Events published since the last drain.
    pub fn drain(&mut self) -> Vec<HiveEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Drain pending events into the coordinator, as the event pump would.
    pub async fn pump(&mut self) {
        for event in self.drain() {
            let _ = self.coordinator.handle_event(&event).await;
        }
    }

    pub async fn register(&self, id: &str) -> AgentProfile {
        let profile = AgentProfile::new(id);
        self.coordinator.register_agent(&profile).await;
        profile
    }

    /// Create `count` tasks and assign them all to `agent`.
    pub async fn queue_on(&self, agent: &str, count: usize) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(count);
        for i in 0..count {
            let task = self
                .scheduler
                .create_task(TaskSpec::new("job", &format!("job {}", i)))
                .await
                .unwrap();
            tasks.push(
                self.scheduler
                    .assign_task(&task.id, AgentId::from(agent))
                    .await
                    .unwrap(),
            );
        }
        tasks
    }

    pub async fn task_count(&self, agent: &str) -> usize {
        self.coordinator
            .get_workload(&AgentId::from(agent))
            .await
            .unwrap()
            .task_count
    }
}

/// Sink recording every event, optionally refusing delivery.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<HiveEvent>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: HiveEvent) -> Result<()> {
        if self.fail {
            return Err(Error::Transport("sink offline".to_string()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Sink that parks the publishing thread until the test lets it go.
///
/// `entered` trips once a publish has started, `release` lets it finish.
pub struct GatedSink {
    pub entered: Barrier,
    pub release: Barrier,
}

impl Default for GatedSink {
    fn default() -> Self {
        Self {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl EventSink for GatedSink {
    fn publish(&self, _event: HiveEvent) -> Result<()> {
        self.entered.wait();
        self.release.wait();
        Ok(())
    }
}

/// Executor double recording abort requests.
#[derive(Default)]
pub struct MockExecutor {
    pub aborted: Mutex<Vec<(TaskId, Option<AgentId>)>>,
    pub fail: bool,
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn abort(&self, task_id: TaskId, agent_id: Option<AgentId>) -> Result<()> {
        self.aborted.lock().unwrap().push((task_id, agent_id));
        if self.fail {
            return Err(Error::Transport("agent unreachable".to_string()));
        }
        Ok(())
    }
}

/// Poll `check` until it returns true or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
