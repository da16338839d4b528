//! Task data model.
//!
//! Tasks are the atomic units of work handed to agents. Each task tracks
//! its lifecycle status, dependencies, placement requirements and the
//! agent that currently owns it.

use crate::agent::AgentId;
use crate::error::{Error, Result};
use crate::workflow::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Priority assigned when a task spec does not carry one.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 100;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// `Completed`, `Failed` and `Cancelled` are terminal: once a task reaches
/// one of them it is never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created and waiting for its dependencies or capacity.
    #[default]
    Pending,
    /// Task is currently being executed by an agent.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task was cancelled before it could finish.
    Cancelled {
        /// Reason given by the caller.
        reason: String,
    },
}

impl TaskStatus {
    /// The payload-free kind of this status, used for filtering.
    pub fn kind(&self) -> StatusKind {
        match self {
            TaskStatus::Pending => StatusKind::Pending,
            TaskStatus::Running => StatusKind::Running,
            TaskStatus::Completed => StatusKind::Completed,
            TaskStatus::Failed { .. } => StatusKind::Failed,
            TaskStatus::Cancelled { .. } => StatusKind::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

/// Status without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StatusKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatusKind::Completed | StatusKind::Failed | StatusKind::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Pending => "pending",
            StatusKind::Running => "running",
            StatusKind::Completed => "completed",
            StatusKind::Failed => "failed",
            StatusKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task relates to one of its predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    /// The predecessor must complete before this task may start.
    #[default]
    FinishToStart,
    /// The predecessor must have started before this task starts.
    StartToStart,
    /// The predecessor must complete before this task completes.
    FinishToFinish,
    /// The predecessor must have started before this task completes.
    StartToFinish,
}

impl DependencyKind {
    /// Whether this kind blocks the dependent from entering `Running`.
    pub fn gates_start(&self) -> bool {
        matches!(self, DependencyKind::FinishToStart)
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::FinishToStart => write!(f, "finish-to-start"),
            DependencyKind::StartToStart => write!(f, "start-to-start"),
            DependencyKind::FinishToFinish => write!(f, "finish-to-finish"),
            DependencyKind::StartToFinish => write!(f, "start-to-finish"),
        }
    }
}

/// A reference from a task to one of its predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub task_id: TaskId,
    #[serde(default)]
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn new(task_id: TaskId, kind: DependencyKind) -> Self {
        Self { task_id, kind }
    }

    pub fn finish_to_start(task_id: TaskId) -> Self {
        Self::new(task_id, DependencyKind::FinishToStart)
    }

    /// Evaluate this dependency against the predecessor's current state.
    ///
    /// An unknown predecessor never satisfies.
    pub fn is_satisfied_by(&self, predecessor: Option<&Task>) -> bool {
        let Some(task) = predecessor else {
            return false;
        };
        match self.kind {
            DependencyKind::FinishToStart | DependencyKind::FinishToFinish => {
                task.status == TaskStatus::Completed
            }
            DependencyKind::StartToStart | DependencyKind::StartToFinish => {
                task.started_at.is_some()
            }
        }
    }
}

/// Caller-supplied description of a task to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    #[serde(default)]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskSpec {
    pub fn new(task_type: &str, description: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.required_capabilities.insert(capability.to_string());
        self
    }

    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        self.dependencies.push(Dependency::finish_to_start(task_id));
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = Some(ms);
        self
    }

    pub fn in_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Check required fields and ranges.
    pub fn validate(&self) -> Result<()> {
        if self.task_type.trim().is_empty() {
            return Err(Error::Validation("task type is required".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(Error::Validation(
                "task description is required".to_string(),
            ));
        }
        if let Some(priority) = self.priority {
            if priority > MAX_PRIORITY {
                return Err(Error::Validation(format!(
                    "priority {} is outside 0..={}",
                    priority, MAX_PRIORITY
                )));
            }
        }
        Ok(())
    }
}

/// A single unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub description: String,
    /// 0-100, higher is more urgent.
    pub priority: u8,
    pub status: TaskStatus,
    pub tags: HashSet<String>,
    pub dependencies: Vec<Dependency>,
    pub required_capabilities: HashSet<String>,
    pub assigned_agent: Option<AgentId>,
    pub estimated_duration_ms: Option<u64>,
    pub workflow_id: Option<WorkflowId>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with the given type and description.
    pub fn new(task_type: &str, description: &str) -> Self {
        Self::from_spec(TaskSpec::new(task_type, description), DEFAULT_PRIORITY)
    }

    /// Build a pending task from a spec, filling in a generated id and
    /// `default_priority` when `spec` has none.
    pub fn from_spec(spec: TaskSpec, default_priority: u8) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_type: spec.task_type,
            description: spec.description,
            priority: spec.priority.unwrap_or(default_priority),
            status: TaskStatus::Pending,
            tags: spec.tags,
            dependencies: spec.dependencies,
            required_capabilities: spec.required_capabilities,
            assigned_agent: None,
            estimated_duration_ms: spec.estimated_duration_ms,
            workflow_id: spec.workflow_id,
            metadata: spec.metadata,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn invalid(&self, to: &str) -> Error {
        Error::InvalidTransition {
            task_id: self.id,
            from: self.status.kind().to_string(),
            to: to.to_string(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Pending -> Running.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid("running"));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Running -> Completed.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid("completed"));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Running -> Failed.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid("failed"));
        }
        self.set_failed(error);
        Ok(())
    }

    /// Pending -> Failed, used when a sibling failure aborts the workflow.
    pub fn fail_before_start(&mut self, error: &str) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid("failed"));
        }
        self.set_failed(error);
        Ok(())
    }

    fn set_failed(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    /// Pending | Running -> Cancelled.
    pub fn cancel(&mut self, reason: &str) -> Result<()> {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::Running) {
            return Err(self.invalid("cancelled"));
        }
        self.status = TaskStatus::Cancelled {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Record the agent that owns this task.
    pub fn assign_agent(&mut self, agent_id: AgentId) {
        self.assigned_agent = Some(agent_id);
        self.touch();
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task has not been started yet.
    pub fn can_start(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Whether `capabilities` covers everything this task requires.
    pub fn can_run_on(&self, capabilities: &HashSet<String>) -> bool {
        self.required_capabilities.is_subset(capabilities)
    }

    /// Time spent running, if the task has started.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }
}
