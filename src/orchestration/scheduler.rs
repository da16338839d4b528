//! Task scheduler.
//!
//! The `TaskScheduler` owns every task and workflow. It validates
//! submissions, gates starts on finish-to-start dependencies and workflow
//! capacity, applies workflow error policies and publishes lifecycle
//! events. All state sits behind a single `RwLock`; events and collaborator
//! calls happen only after the lock is released.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::AgentId;
use crate::core::{
    DependencyState, Task, TaskId, TaskSpec, TaskStatus, TaskStore, DEFAULT_PRIORITY,
};
use crate::error::{Error, Result};
use crate::util;
use crate::workflow::{
    ParallelismStrategy, Workflow, WorkflowId, WorkflowProgress, WorkflowSpec,
};

use super::events::{EventSink, HiveEvent};
use super::query::{TaskList, TaskQuery};

/// Reason recorded on siblings failed by a fail-fast workflow.
pub const UPSTREAM_FAILURE: &str = "upstream failure";

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Task-execution collaborator.
///
/// The scheduler never runs tasks itself; it only asks the execution layer
/// to stop one when a running task is cancelled with rollback.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Stop the task on its agent. Best effort.
    async fn abort(&self, task_id: TaskId, agent_id: Option<AgentId>) -> Result<()>;
}

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Priority given to tasks submitted without one.
    pub default_priority: u8,
    /// Upper bound on a rollback abort call.
    pub abort_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            abort_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn with_default_priority(mut self, priority: u8) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_abort_timeout(mut self, timeout: Duration) -> Self {
        self.abort_timeout = timeout;
        self
    }
}

/// Answer to `get_task_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task: Task,
    /// Each declared dependency with its current predecessor.
    pub dependencies: Vec<DependencyState>,
    /// Known tasks that depend on this one.
    pub dependents: Vec<TaskId>,
    /// Pending with every finish-to-start dependency completed.
    pub eligible: bool,
}

#[derive(Debug, Default)]
struct SchedulerState {
    tasks: TaskStore,
    workflows: HashMap<WorkflowId, Workflow>,
    /// Workflow ids in creation order.
    workflow_order: Vec<WorkflowId>,
}

impl SchedulerState {
    fn workflow(&self, id: &WorkflowId) -> Result<&Workflow> {
        self.workflows.get(id).ok_or(Error::WorkflowNotFound(*id))
    }

    /// A workflow has started once any of its tasks has run.
    fn workflow_started(&self, id: &WorkflowId) -> bool {
        self.tasks
            .in_workflow(id)
            .iter()
            .any(|task| task.started_at.is_some())
    }

    fn require_not_started(&self, id: &WorkflowId) -> Result<()> {
        if self.workflow_started(id) {
            return Err(Error::WorkflowStarted(*id));
        }
        Ok(())
    }

    /// Check that `task_id` may join a workflow.
    fn check_attachable(&self, task_id: &TaskId, workflow_id: &WorkflowId) -> Result<()> {
        let task = self.tasks.require(task_id)?;
        if let Some(current) = &task.workflow_id {
            if current != workflow_id {
                return Err(Error::Validation(format!(
                    "task {} already belongs to workflow {}",
                    task_id.short(),
                    current.short()
                )));
            }
        }
        if !task.can_start() || task.started_at.is_some() {
            return Err(Error::Validation(format!(
                "task {} is {} and cannot join a workflow",
                task_id.short(),
                task.status.kind()
            )));
        }
        Ok(())
    }

    fn progress(&self, id: &WorkflowId) -> WorkflowProgress {
        WorkflowProgress::from_tasks(*id, self.tasks.in_workflow(id))
    }
}

/// Owner of all tasks and workflows.
pub struct TaskScheduler {
    state: RwLock<SchedulerState>,
    sink: Arc<dyn EventSink>,
    executor: Option<Arc<dyn TaskExecutor>>,
    config: SchedulerConfig,
    accepting: AtomicBool,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: RwLock::new(SchedulerState::default()),
            sink,
            executor: None,
            config,
            accepting: AtomicBool::new(true),
        }
    }

    /// Attach the collaborator used to abort running tasks on rollback.
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn emit(&self, events: Vec<HiveEvent>) {
        for event in events {
            let name = event.name();
            if let Err(e) = self.sink.publish(event) {
                debug!(event = name, error = %e, "Event not delivered");
            }
        }
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    // ========== Tasks ==========

    /// Validate and store a new pending task.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed spec, `WorkflowNotFound` for an
    /// unknown workflow, `WorkflowStarted` when that workflow already runs,
    /// and `ShuttingDown` after [`shutdown`](Self::shutdown).
    pub async fn create_task(&self, spec: TaskSpec) -> Result<Task> {
        self.ensure_accepting()?;
        spec.validate()?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if let Some(workflow_id) = &spec.workflow_id {
            state.workflow(workflow_id)?;
            state.require_not_started(workflow_id)?;
        }

        let task = Task::from_spec(spec, self.config.default_priority);
        state.tasks.insert(task.clone())?;
        if let Some(workflow_id) = &task.workflow_id {
            if let Some(workflow) = state.workflows.get_mut(workflow_id) {
                workflow.tasks.push(task.id);
            }
        }
        drop(guard);

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            dependencies = task.dependencies.len(),
            "Created task"
        );
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.state.read().await.tasks.require(task_id).cloned()
    }

    /// Filter, sort and page the stored tasks.
    pub async fn list_tasks(&self, query: &TaskQuery) -> TaskList {
        let state = self.state.read().await;
        query.apply(state.tasks.iter())
    }

    /// Current state of a task together with its dependency picture.
    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatusReport> {
        let state = self.state.read().await;
        let task = state.tasks.require(task_id)?;
        Ok(TaskStatusReport {
            dependencies: state.tasks.dependency_states(task_id)?,
            dependents: state.tasks.dependents(task_id),
            eligible: state.tasks.is_eligible(task),
            task: task.clone(),
        })
    }

    /// Cancel a pending or running task.
    ///
    /// With `rollback` set and a running task, the execution layer is asked
    /// to abort it. That call is bounded by the abort timeout and its
    /// failure is only logged. Dependents are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` or `InvalidTransition` for a finished task.
    pub async fn cancel_task(&self, task_id: &TaskId, reason: &str, rollback: bool) -> Result<Task> {
        let (task, was_running) = {
            let mut state = self.state.write().await;
            let task = state.tasks.require_mut(task_id)?;
            let was_running = task.status == TaskStatus::Running;
            task.cancel(reason)?;
            (task.clone(), was_running)
        };

        info!(task_id = %task_id, reason, rollback, "Cancelled task");
        self.emit(vec![HiveEvent::TaskCancelled {
            task_id: *task_id,
            agent_id: task.assigned_agent.clone(),
            reason: reason.to_string(),
        }]);

        if rollback && was_running {
            if let Some(executor) = &self.executor {
                let abort = executor.abort(*task_id, task.assigned_agent.clone());
                if let Err(e) = util::with_timeout(self.config.abort_timeout, abort).await {
                    warn!(task_id = %task_id, error = %e, "Rollback abort failed");
                }
            }
        }
        Ok(task)
    }

    /// Unassigned eligible tasks ready to be handed out.
    ///
    /// Without a workflow every eligible unassigned task is returned, most
    /// urgent first. With a workflow the tasks are ordered by its
    /// parallelism strategy and cut to its free capacity.
    pub async fn eligible_tasks(&self, workflow_id: Option<&WorkflowId>) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        let Some(workflow_id) = workflow_id else {
            let mut tasks: Vec<Task> = state
                .tasks
                .eligible()
                .into_iter()
                .filter(|task| task.assigned_agent.is_none())
                .cloned()
                .collect();
            tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
            return Ok(tasks);
        };

        let workflow = state.workflow(workflow_id)?;
        let mut tasks: Vec<Task> = state
            .tasks
            .in_workflow(workflow_id)
            .into_iter()
            .filter(|task| task.assigned_agent.is_none() && state.tasks.is_eligible(task))
            .cloned()
            .collect();

        match workflow.parallelism.strategy {
            ParallelismStrategy::PriorityBased => {
                tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
            }
            ParallelismStrategy::BreadthFirst | ParallelismStrategy::DepthFirst => {
                let depths = state.tasks.depths();
                let depth = |task: &Task| depths.get(&task.id).copied().unwrap_or(0);
                if workflow.parallelism.strategy == ParallelismStrategy::BreadthFirst {
                    tasks.sort_by_key(|task| depth(task));
                } else {
                    tasks.sort_by(|a, b| depth(b).cmp(&depth(a)));
                }
            }
        }

        let running = state.tasks.running_in_workflow(workflow_id);
        let free = workflow.parallelism.max_concurrent.saturating_sub(running);
        tasks.truncate(free);
        Ok(tasks)
    }

    /// Record the agent that will run a pending task.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the task is pending and
    /// `Validation` when it already has an agent.
    pub async fn assign_task(&self, task_id: &TaskId, agent_id: AgentId) -> Result<Task> {
        let task = {
            let mut state = self.state.write().await;
            let task = state.tasks.require_mut(task_id)?;
            if !task.can_start() {
                return Err(Error::InvalidTransition {
                    task_id: *task_id,
                    from: task.status.kind().to_string(),
                    to: "assigned".to_string(),
                });
            }
            if let Some(current) = &task.assigned_agent {
                return Err(Error::Validation(format!(
                    "task {} is already assigned to {}",
                    task_id.short(),
                    current
                )));
            }
            task.assign_agent(agent_id.clone());
            task.clone()
        };

        debug!(task_id = %task_id, agent_id = %agent_id, "Assigned task");
        self.emit(vec![HiveEvent::TaskAssigned {
            task_id: *task_id,
            agent_id,
        }]);
        Ok(task)
    }

    /// Move a pending task to running.
    ///
    /// # Errors
    ///
    /// Returns `DependenciesUnsatisfied` while a finish-to-start dependency
    /// has not completed and `WorkflowAtCapacity` when the task's workflow
    /// already runs `max_concurrent` tasks.
    pub async fn start_task(&self, task_id: &TaskId) -> Result<Task> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let task = state.tasks.require(task_id)?;
        if !task.can_start() {
            return Err(Error::InvalidTransition {
                task_id: *task_id,
                from: task.status.kind().to_string(),
                to: "running".to_string(),
            });
        }
        let unsatisfied = state.tasks.unsatisfied_gates(task);
        if unsatisfied > 0 {
            return Err(Error::DependenciesUnsatisfied {
                task_id: *task_id,
                unsatisfied,
            });
        }
        if let Some(workflow_id) = task.workflow_id {
            let max = state.workflow(&workflow_id)?.parallelism.max_concurrent;
            if state.tasks.running_in_workflow(&workflow_id) >= max {
                return Err(Error::WorkflowAtCapacity { workflow_id, max });
            }
        }

        let task = state.tasks.require_mut(task_id)?;
        task.start()?;
        debug!(task_id = %task_id, "Started task");
        Ok(task.clone())
    }

    /// Mark a running task completed.
    ///
    /// `duration_ms` defaults to the time since the task started.
    pub async fn complete_task(&self, task_id: &TaskId, duration_ms: Option<u64>) -> Result<Task> {
        let task = {
            let mut state = self.state.write().await;
            let task = state.tasks.require_mut(task_id)?;
            task.complete()?;
            task.clone()
        };

        let duration_ms = duration_ms.unwrap_or_else(|| {
            task.elapsed()
                .and_then(|elapsed| elapsed.to_std().ok())
                .map(saturating_millis)
                .unwrap_or(0)
        });
        info!(task_id = %task_id, duration_ms, "Completed task");
        self.emit(vec![HiveEvent::TaskCompleted {
            task_id: *task_id,
            agent_id: task.assigned_agent.clone(),
            duration_ms,
        }]);
        Ok(task)
    }

    /// Mark a running task failed and apply its workflow's error policy.
    ///
    /// Under fail-fast every pending sibling fails with "upstream failure".
    pub async fn fail_task(&self, task_id: &TaskId, error: &str) -> Result<Task> {
        let (task, events) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            let task = state.tasks.require_mut(task_id)?;
            task.fail(error)?;
            let task = task.clone();
            let mut events = vec![HiveEvent::TaskFailed {
                task_id: *task_id,
                agent_id: task.assigned_agent.clone(),
                error: error.to_string(),
            }];

            let fail_fast = task
                .workflow_id
                .and_then(|id| state.workflows.get(&id))
                .map_or(false, Workflow::is_fail_fast);
            if let (true, Some(workflow_id)) = (fail_fast, task.workflow_id) {
                let siblings: Vec<TaskId> = state
                    .tasks
                    .in_workflow(&workflow_id)
                    .into_iter()
                    .filter(|sibling| sibling.can_start())
                    .map(|sibling| sibling.id)
                    .collect();
                for sibling_id in siblings {
                    let sibling = state.tasks.require_mut(&sibling_id)?;
                    sibling.fail_before_start(UPSTREAM_FAILURE)?;
                    events.push(HiveEvent::TaskFailed {
                        task_id: sibling_id,
                        agent_id: sibling.assigned_agent.clone(),
                        error: UPSTREAM_FAILURE.to_string(),
                    });
                }
                if events.len() > 1 {
                    warn!(
                        workflow_id = %workflow_id,
                        failed_siblings = events.len() - 1,
                        "Fail-fast workflow aborted pending tasks"
                    );
                }
            }
            (task, events)
        };

        info!(task_id = %task_id, error, "Task failed");
        self.emit(events);
        Ok(task)
    }

    /// Hand up to `count` pending tasks owned by `source` to `target`.
    ///
    /// The least urgent tasks move first, newest first among equals. Tasks
    /// needing a capability outside `target_capabilities` stay put.
    /// Returns the ids actually moved.
    pub async fn reassign_tasks(
        &self,
        source: &AgentId,
        target: &AgentId,
        count: usize,
        target_capabilities: &HashSet<String>,
    ) -> Vec<TaskId> {
        let moved: Vec<TaskId> = {
            let mut state = self.state.write().await;
            let mut candidates: Vec<(u8, usize, TaskId)> = state
                .tasks
                .iter()
                .filter(|task| task.can_start() && task.assigned_agent.as_ref() == Some(source))
                .filter(|task| task.can_run_on(target_capabilities))
                .filter_map(|task| {
                    state
                        .tasks
                        .position(&task.id)
                        .map(|position| (task.priority, position, task.id))
                })
                .collect();
            candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

            let mut moved = Vec::new();
            for (_, _, task_id) in candidates.into_iter().take(count) {
                if let Some(task) = state.tasks.get_mut(&task_id) {
                    task.assign_agent(target.clone());
                    moved.push(task_id);
                }
            }
            moved
        };

        if moved.len() < count {
            debug!(
                source = %source,
                target = %target,
                requested = count,
                moved = moved.len(),
                "Reassigned fewer tasks than requested"
            );
        }
        self.emit(
            moved
                .iter()
                .map(|task_id| HiveEvent::TaskReassigned {
                    task_id: *task_id,
                    from_agent_id: source.clone(),
                    to_agent_id: target.clone(),
                })
                .collect(),
        );
        moved
    }

    /// Unfinished tasks currently owned by an agent.
    pub async fn tasks_for_agent(&self, agent_id: &AgentId) -> Vec<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .iter()
            .filter(|task| !task.is_finished() && task.assigned_agent.as_ref() == Some(agent_id))
            .cloned()
            .collect()
    }

    pub async fn task_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    // ========== Workflows ==========

    /// Create a workflow, attaching any existing tasks listed in `spec`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed spec or a task that cannot
    /// join, `TaskNotFound` for an unknown task and `ShuttingDown` after
    /// [`shutdown`](Self::shutdown).
    pub async fn create_workflow(&self, spec: WorkflowSpec) -> Result<Workflow> {
        self.ensure_accepting()?;
        spec.validate()?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let workflow = Workflow::from_spec(spec);
        for task_id in &workflow.tasks {
            state.check_attachable(task_id, &workflow.id)?;
        }
        for task_id in &workflow.tasks {
            if let Some(task) = state.tasks.get_mut(task_id) {
                task.workflow_id = Some(workflow.id);
            }
        }
        state.workflow_order.push(workflow.id);
        state.workflows.insert(workflow.id, workflow.clone());
        drop(guard);

        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            tasks = workflow.tasks.len(),
            strategy = %workflow.parallelism.strategy,
            "Created workflow"
        );
        Ok(workflow)
    }

    /// All workflows in creation order.
    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let state = self.state.read().await;
        state
            .workflow_order
            .iter()
            .filter_map(|id| state.workflows.get(id))
            .cloned()
            .collect()
    }

    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        self.state.read().await.workflow(workflow_id).cloned()
    }

    pub async fn workflow_progress(&self, workflow_id: &WorkflowId) -> Result<WorkflowProgress> {
        let state = self.state.read().await;
        state.workflow(workflow_id)?;
        Ok(state.progress(workflow_id))
    }

    /// Add an existing pending task to a workflow that has not started.
    pub async fn attach_task(&self, workflow_id: &WorkflowId, task_id: &TaskId) -> Result<Workflow> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.workflow(workflow_id)?;
        state.require_not_started(workflow_id)?;
        state.check_attachable(task_id, workflow_id)?;

        state.tasks.require_mut(task_id)?.workflow_id = Some(*workflow_id);
        let workflow = state
            .workflows
            .get_mut(workflow_id)
            .ok_or(Error::WorkflowNotFound(*workflow_id))?;
        if !workflow.contains(task_id) {
            workflow.tasks.push(*task_id);
        }
        debug!(workflow_id = %workflow_id, task_id = %task_id, "Attached task");
        Ok(workflow.clone())
    }

    /// Remove a task from a workflow that has not started.
    pub async fn detach_task(&self, workflow_id: &WorkflowId, task_id: &TaskId) -> Result<Workflow> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.workflow(workflow_id)?;
        state.require_not_started(workflow_id)?;

        let task = state.tasks.require_mut(task_id)?;
        if task.workflow_id.as_ref() != Some(workflow_id) {
            return Err(Error::Validation(format!(
                "task {} is not part of workflow {}",
                task_id.short(),
                workflow_id.short()
            )));
        }
        task.workflow_id = None;
        let workflow = state
            .workflows
            .get_mut(workflow_id)
            .ok_or(Error::WorkflowNotFound(*workflow_id))?;
        workflow.tasks.retain(|id| id != task_id);
        debug!(workflow_id = %workflow_id, task_id = %task_id, "Detached task");
        Ok(workflow.clone())
    }

    // ========== Lifecycle ==========

    /// Stop accepting new tasks and workflows. Existing tasks keep working.
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Scheduler stopped accepting submissions");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
