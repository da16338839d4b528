//! Filtering, sorting and pagination for `list_tasks`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::agent::AgentId;
use crate::core::{StatusKind, Task};
use crate::workflow::WorkflowId;

/// Inclusive priority bounds. Missing bounds are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriorityRange {
    #[serde(default)]
    pub min: Option<u8>,
    #[serde(default)]
    pub max: Option<u8>,
}

impl PriorityRange {
    pub fn at_least(min: u8) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn contains(&self, priority: u8) -> bool {
        self.min.map_or(true, |min| priority >= min) && self.max.map_or(true, |max| priority <= max)
    }
}

/// Criteria a task must meet to be listed. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub priority: Option<PriorityRange>,
    /// Matches when the task carries any of these tags.
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub status: Option<StatusKind>,
    #[serde(default)]
    pub assigned_agent: Option<AgentId>,
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
    /// Every entry must be present in the task's metadata with an equal value.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(range) = &self.priority {
            if !range.contains(task.priority) {
                return false;
            }
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&task.tags) {
            return false;
        }
        if let Some(task_type) = &self.task_type {
            if &task.task_type != task_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status.kind() != status {
                return false;
            }
        }
        if let Some(agent) = &self.assigned_agent {
            if task.assigned_agent.as_ref() != Some(agent) {
                return false;
            }
        }
        if let Some(workflow_id) = &self.workflow_id {
            if task.workflow_id.as_ref() != Some(workflow_id) {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(key, value)| task.metadata.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Priority,
    EstimatedDuration,
    CreatedAt,
    UpdatedAt,
    #[serde(rename = "type")]
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }

    /// Compare two tasks. Tasks without an estimate sort after those with
    /// one in either direction.
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let ordering = match self.field {
            SortField::Priority => a.priority.cmp(&b.priority),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Type => a.task_type.cmp(&b.task_type),
            SortField::EstimatedDuration => {
                match (a.estimated_duration_ms, b.estimated_duration_ms) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => return Ordering::Less,
                    (None, Some(_)) => return Ordering::Greater,
                    (None, None) => return Ordering::Equal,
                }
            }
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// A `list_tasks` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub filter: TaskFilter,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: TaskFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sorted_by(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Run the query over tasks given in insertion order.
    ///
    /// Sorting is stable, so ties keep insertion order. `total` counts the
    /// filtered tasks before pagination.
    pub fn apply<'a, I>(&self, tasks: I) -> TaskList
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut matched: Vec<&Task> = tasks
            .into_iter()
            .filter(|task| self.filter.matches(task))
            .collect();
        if let Some(sort) = &self.sort {
            matched.sort_by(|a, b| sort.compare(a, b));
        }

        let total = matched.len();
        let limit = self.limit.unwrap_or(usize::MAX);
        let tasks = matched
            .into_iter()
            .skip(self.offset)
            .take(limit)
            .cloned()
            .collect();
        TaskList { tasks, total }
    }
}

/// Result of `list_tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<Task>,
    /// Number of tasks matching the filter, ignoring pagination.
    pub total: usize,
}
