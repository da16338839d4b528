use thiserror::Error;

use crate::agent::AgentId;
use crate::core::TaskId;
use crate::orchestration::StealOperationId;
use crate::workflow::WorkflowId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Agent not found: {id}")]
    AgentNotFound { id: AgentId },

    #[error("Steal operation not found: {0}")]
    StealOperationNotFound(StealOperationId),

    #[error("Invalid transition for task {task_id} from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: String,
        to: String,
    },

    #[error("Task {task_id} has {unsatisfied} unsatisfied finish-to-start dependencies")]
    DependenciesUnsatisfied { task_id: TaskId, unsatisfied: usize },

    #[error("Workflow {workflow_id} is at capacity (max concurrent: {max})")]
    WorkflowAtCapacity { workflow_id: WorkflowId, max: usize },

    #[error("Workflow {0} has already started executing")]
    WorkflowStarted(WorkflowId),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
