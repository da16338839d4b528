//! Workflow progress derived from the states of its tasks.
//!
//! Workflows carry no status of their own; `WorkflowProgress` summarises
//! the member tasks and derives the workflow's status from them.

use serde::{Deserialize, Serialize};

use crate::core::{StatusKind, Task};

use super::WorkflowId;

/// Status of a workflow, derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// No task has started yet.
    #[default]
    Pending,
    /// Some tasks have started and not all have finished.
    Running,
    /// Every task completed.
    Completed,
    /// Every task finished and at least one failed.
    Failed,
    /// Every task finished, none failed, at least one was cancelled.
    Cancelled,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-status task counts for one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub workflow_id: WorkflowId,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub status: WorkflowStatus,
}

impl WorkflowProgress {
    /// Summarise the given member tasks.
    pub fn from_tasks<'a, I>(workflow_id: WorkflowId, tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut progress = Self {
            workflow_id,
            total: 0,
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            status: WorkflowStatus::Pending,
        };
        let mut any_started = false;

        for task in tasks {
            progress.total += 1;
            any_started |= task.started_at.is_some();
            match task.status.kind() {
                StatusKind::Pending => progress.pending += 1,
                StatusKind::Running => progress.running += 1,
                StatusKind::Completed => progress.completed += 1,
                StatusKind::Failed => progress.failed += 1,
                StatusKind::Cancelled => progress.cancelled += 1,
            }
        }

        progress.status = progress.derive_status(any_started);
        progress
    }

    fn derive_status(&self, any_started: bool) -> WorkflowStatus {
        if self.total == 0 {
            return WorkflowStatus::Pending;
        }
        if self.finished() < self.total {
            if any_started || self.finished() > 0 {
                return WorkflowStatus::Running;
            }
            return WorkflowStatus::Pending;
        }
        if self.failed > 0 {
            WorkflowStatus::Failed
        } else if self.cancelled > 0 {
            WorkflowStatus::Cancelled
        } else {
            WorkflowStatus::Completed
        }
    }

    /// Number of tasks in a terminal state.
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    /// Fraction of tasks in a terminal state, 0.0 for an empty workflow.
    pub fn fraction_finished(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.finished() as f64 / self.total as f64
        }
    }
}
