//! Task store backed by a dependency DAG.
//!
//! `TaskStore` owns every task created by the engine. Tasks are kept as
//! nodes of a petgraph `DiGraph`, with an edge from each known predecessor
//! to its dependent. Nodes are never removed, so node indices double as
//! insertion order for stable sorting.

use crate::core::task::{Dependency, Task, TaskId};
use crate::error::{Error, Result};
use crate::workflow::WorkflowId;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A dependency of a task resolved against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyState {
    /// The dependency as declared on the task.
    pub dependency: Dependency,
    /// Current snapshot of the predecessor, `None` when the id is unknown.
    pub task: Option<Task>,
    /// Whether the dependency is currently satisfied.
    pub satisfied: bool,
}

/// In-memory store of tasks plus their dependency index.
pub struct TaskStore {
    /// Tasks as nodes, edges point from predecessor to dependent.
    graph: DiGraph<Task, Dependency>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Insert a task, linking it to every predecessor already in the store.
    ///
    /// Dependencies on unknown ids are kept on the task but produce no edge;
    /// they simply never become satisfied.
    ///
    /// # Errors
    /// Returns an error if a task with the same id is already stored.
    pub fn insert(&mut self, task: Task) -> Result<NodeIndex> {
        if self.task_index.contains_key(&task.id) {
            return Err(Error::Validation(format!(
                "Task {} already exists",
                task.id
            )));
        }

        let id = task.id;
        let dependencies = task.dependencies.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);

        for dependency in dependencies {
            if let Some(&from) = self.task_index.get(&dependency.task_id) {
                if from != index {
                    self.graph.add_edge(from, index, dependency);
                }
            }
        }

        Ok(index)
    }

    /// Get a reference to a task by its ID.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        let index = *self.task_index.get(id)?;
        self.graph.node_weight_mut(index)
    }

    /// Get a task or a not-found error.
    pub fn require(&self, id: &TaskId) -> Result<&Task> {
        self.get(id).ok_or(Error::TaskNotFound(*id))
    }

    /// Get a mutable task or a not-found error.
    pub fn require_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        self.get_mut(id).ok_or(Error::TaskNotFound(*id))
    }

    /// Position of the task in insertion order.
    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.task_index.get(id).map(|index| index.index())
    }

    /// Check if the store contains a task.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Number of stored tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges between known tasks.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    // ========== Dependency Queries ==========

    /// Resolve every declared dependency of a task against the store.
    pub fn dependency_states(&self, id: &TaskId) -> Result<Vec<DependencyState>> {
        let task = self.require(id)?;
        Ok(task
            .dependencies
            .iter()
            .map(|dependency| {
                let predecessor = self.get(&dependency.task_id);
                DependencyState {
                    dependency: *dependency,
                    satisfied: dependency.is_satisfied_by(predecessor),
                    task: predecessor.cloned(),
                }
            })
            .collect())
    }

    /// Count the finish-to-start dependencies of `task` that are not yet met.
    pub fn unsatisfied_gates(&self, task: &Task) -> usize {
        task.dependencies
            .iter()
            .filter(|dependency| dependency.kind.gates_start())
            .filter(|dependency| !dependency.is_satisfied_by(self.get(&dependency.task_id)))
            .count()
    }

    /// A task is eligible when it is pending and every finish-to-start
    /// dependency has completed.
    pub fn is_eligible(&self, task: &Task) -> bool {
        task.can_start() && self.unsatisfied_gates(task) == 0
    }

    /// Eligible tasks in insertion order.
    pub fn eligible(&self) -> Vec<&Task> {
        self.iter().filter(|task| self.is_eligible(task)).collect()
    }

    /// Tasks that declared a dependency on `id`.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        dependents.sort();
        dependents.dedup();
        dependents
            .into_iter()
            .filter_map(|neighbor| self.graph.node_weight(neighbor))
            .map(|task| task.id)
            .collect()
    }

    /// Dependency depth of every task: 0 for roots, otherwise one more than
    /// the deepest known predecessor.
    pub fn depths(&self) -> HashMap<TaskId, usize> {
        // Edges only ever point from older to newer nodes, so index order is
        // already topological; toposort keeps this honest if that changes.
        let order: Vec<NodeIndex> = toposort(&self.graph, None)
            .unwrap_or_else(|_| self.graph.node_indices().collect());

        let mut by_index: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        for index in order {
            let depth = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|pred| by_index.get(&pred))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            by_index.insert(index, depth);
        }

        by_index
            .into_iter()
            .filter_map(|(index, depth)| self.graph.node_weight(index).map(|t| (t.id, depth)))
            .collect()
    }

    // ========== Workflow Queries ==========

    /// Tasks belonging to a workflow, in insertion order.
    pub fn in_workflow(&self, workflow_id: &WorkflowId) -> Vec<&Task> {
        self.iter()
            .filter(|task| task.workflow_id.as_ref() == Some(workflow_id))
            .collect()
    }

    /// Number of running tasks that belong to a workflow.
    pub fn running_in_workflow(&self, workflow_id: &WorkflowId) -> usize {
        self.in_workflow(workflow_id)
            .into_iter()
            .filter(|task| task.status == crate::core::TaskStatus::Running)
            .count()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
