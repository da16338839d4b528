//! Lifecycle events and the in-process event bus.
//!
//! Every event crossing the bus is a variant of [`HiveEvent`], tagged on the
//! wire by its event name (`task:assigned`, `work:steal`, ...). Payloads
//! decoded from JSON are validated before they reach a handler.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent::AgentId;
use crate::core::TaskId;
use crate::error::{Error, Result};

use super::stealing::StealOperationId;

/// Default capacity of the broadcast channel backing [`EventBus`].
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Events exchanged between the scheduler, the coordinator and the agent
/// execution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum HiveEvent {
    /// A task was given to an agent for the first time.
    #[serde(rename = "task:assigned")]
    TaskAssigned { task_id: TaskId, agent_id: AgentId },
    /// A task finished successfully.
    #[serde(rename = "task:completed")]
    TaskCompleted {
        task_id: TaskId,
        agent_id: Option<AgentId>,
        duration_ms: u64,
    },
    /// A task failed, either while running or because a sibling failed.
    #[serde(rename = "task:failed")]
    TaskFailed {
        task_id: TaskId,
        agent_id: Option<AgentId>,
        error: String,
    },
    /// A task was cancelled by a caller.
    #[serde(rename = "task:cancelled")]
    TaskCancelled {
        task_id: TaskId,
        agent_id: Option<AgentId>,
        reason: String,
    },
    /// Ownership of a queued task moved between agents by a steal.
    #[serde(rename = "task:reassigned")]
    TaskReassigned {
        task_id: TaskId,
        from_agent_id: AgentId,
        to_agent_id: AgentId,
    },
    /// Periodic agent telemetry.
    #[serde(rename = "agent:metrics_updated")]
    AgentMetricsUpdated {
        agent_id: AgentId,
        cpu_usage: f64,
        memory_usage: f64,
        /// Authoritative queue length, when the agent reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_count: Option<usize>,
    },
    /// Request to move queued work from one agent to another.
    #[serde(rename = "work:steal")]
    WorkSteal {
        operation_id: StealOperationId,
        source_agent_id: AgentId,
        target_agent_id: AgentId,
        tasks_to_steal: usize,
        reason: String,
    },
}

impl HiveEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            HiveEvent::TaskAssigned { .. } => "task:assigned",
            HiveEvent::TaskCompleted { .. } => "task:completed",
            HiveEvent::TaskFailed { .. } => "task:failed",
            HiveEvent::TaskCancelled { .. } => "task:cancelled",
            HiveEvent::TaskReassigned { .. } => "task:reassigned",
            HiveEvent::AgentMetricsUpdated { .. } => "agent:metrics_updated",
            HiveEvent::WorkSteal { .. } => "work:steal",
        }
    }

    /// Decode and validate an event received from outside the process.
    pub fn from_json(json: &str) -> Result<Self> {
        let event: HiveEvent = serde_json::from_str(json)?;
        event.validate()?;
        Ok(event)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reject payloads that no handler could act on.
    pub fn validate(&self) -> Result<()> {
        match self {
            HiveEvent::TaskAssigned { agent_id, .. } => require_agent(agent_id),
            HiveEvent::TaskCompleted { agent_id, .. }
            | HiveEvent::TaskFailed { agent_id, .. }
            | HiveEvent::TaskCancelled { agent_id, .. } => match agent_id {
                Some(agent_id) => require_agent(agent_id),
                None => Ok(()),
            },
            HiveEvent::TaskReassigned {
                from_agent_id,
                to_agent_id,
                ..
            } => {
                require_agent(from_agent_id)?;
                require_agent(to_agent_id)
            }
            HiveEvent::AgentMetricsUpdated {
                agent_id,
                cpu_usage,
                memory_usage,
                ..
            } => {
                require_agent(agent_id)?;
                require_percentage("cpu_usage", *cpu_usage)?;
                require_percentage("memory_usage", *memory_usage)
            }
            HiveEvent::WorkSteal {
                source_agent_id,
                target_agent_id,
                tasks_to_steal,
                ..
            } => {
                require_agent(source_agent_id)?;
                require_agent(target_agent_id)?;
                if source_agent_id == target_agent_id {
                    return Err(Error::Validation(
                        "work:steal source and target must differ".to_string(),
                    ));
                }
                if *tasks_to_steal == 0 {
                    return Err(Error::Validation(
                        "work:steal must move at least one task".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn require_agent(agent_id: &AgentId) -> Result<()> {
    if agent_id.as_str().trim().is_empty() {
        return Err(Error::Validation("agent_id must not be blank".to_string()));
    }
    Ok(())
}

fn require_percentage(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(Error::Validation(format!(
            "{} must be within 0..=100, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Destination for outbound events.
///
/// The scheduler and the coordinator publish through this seam so the
/// transport can be swapped for a networked bus or a test double.
/// The coordinator publishes steals while holding its operation log, so
/// implementations must hand the event off without waiting on a consumer.
pub trait EventSink: Send + Sync {
    /// Publish an event. Errors mean the event was not delivered.
    fn publish(&self, event: HiveEvent) -> Result<()>;
}

/// In-process publish/subscribe bus over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HiveEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new subscriber. Only events published afterwards are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<HiveEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: HiveEvent) -> Result<()> {
        let name = event.name();
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| Error::Transport(format!("no subscribers for {}", name)))
    }
}
