//! Core workflow type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::TaskId;
use crate::error::{Error, Result};

/// Unique identifier for a workflow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new unique workflow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Order in which eligible workflow tasks are offered for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ParallelismStrategy {
    /// Most urgent first.
    #[default]
    PriorityBased,
    /// Shallowest dependency level first.
    BreadthFirst,
    /// Deepest dependency level first.
    DepthFirst,
}

impl std::fmt::Display for ParallelismStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParallelismStrategy::PriorityBased => write!(f, "priority-based"),
            ParallelismStrategy::BreadthFirst => write!(f, "breadth-first"),
            ParallelismStrategy::DepthFirst => write!(f, "depth-first"),
        }
    }
}

/// What happens to sibling tasks when one task of the workflow fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategy {
    /// Fail every sibling that has not started yet.
    #[default]
    FailFast,
    /// Leave siblings untouched.
    ContinueOnError,
}

impl std::fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorStrategy::FailFast => write!(f, "fail-fast"),
            ErrorStrategy::ContinueOnError => write!(f, "continue-on-error"),
        }
    }
}

/// Parallelism policy of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelismConfig {
    /// Maximum number of workflow tasks running at the same time.
    pub max_concurrent: usize,
    #[serde(default)]
    pub strategy: ParallelismStrategy,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            strategy: ParallelismStrategy::default(),
        }
    }
}

/// Error-handling policy of a workflow.
///
/// `max_retries` is carried for the execution layer, which retries a task
/// before reporting its failure to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorHandling {
    #[serde(default)]
    pub strategy: ErrorStrategy,
    #[serde(default)]
    pub max_retries: u32,
}

/// Caller-supplied description of a workflow to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Existing tasks to attach to the workflow.
    #[serde(default)]
    pub tasks: Vec<TaskId>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub parallelism: ParallelismConfig,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl WorkflowSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.parallelism.max_concurrent = max_concurrent;
        self
    }

    pub fn with_strategy(mut self, strategy: ParallelismStrategy) -> Self {
        self.parallelism.strategy = strategy;
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_handling.strategy = strategy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.error_handling.max_retries = max_retries;
        self
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.tasks.push(task_id);
        self
    }

    pub fn with_variable(mut self, key: &str, value: serde_json::Value) -> Self {
        self.variables.insert(key.to_string(), value);
        self
    }

    pub fn created_by(mut self, who: &str) -> Self {
        self.created_by = Some(who.to_string());
        self
    }

    /// Check required fields and ranges.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("workflow name is required".to_string()));
        }
        if self.parallelism.max_concurrent == 0 {
            return Err(Error::Validation(
                "parallelism.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A named, versioned collection of tasks with an execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub version: String,
    /// Task references in the order they were attached.
    pub tasks: Vec<TaskId>,
    pub variables: HashMap<String, serde_json::Value>,
    pub parallelism: ParallelismConfig,
    pub error_handling: ErrorHandling,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Build a workflow from a validated spec.
    pub fn from_spec(spec: WorkflowSpec) -> Self {
        let mut tasks: Vec<TaskId> = Vec::with_capacity(spec.tasks.len());
        for id in spec.tasks {
            if !tasks.contains(&id) {
                tasks.push(id);
            }
        }
        Self {
            id: WorkflowId::new(),
            name: spec.name,
            version: spec.version.unwrap_or_else(|| "1.0.0".to_string()),
            tasks,
            variables: spec.variables,
            parallelism: spec.parallelism,
            error_handling: spec.error_handling,
            created_by: spec.created_by.unwrap_or_else(|| "system".to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains(task_id)
    }

    pub fn is_fail_fast(&self) -> bool {
        self.error_handling.strategy == ErrorStrategy::FailFast
    }
}
