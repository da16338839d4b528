//! Work-stealing coordinator.
//!
//! Watches per-agent workloads fed by lifecycle events and telemetry, and
//! periodically moves queued work from overloaded agents to underloaded
//! ones. A steal is decided here and announced with a `work:steal` event;
//! the placement layer performs the actual move and reports back through
//! [`WorkStealingCoordinator::confirm_steal`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentId, AgentProfile};
use crate::core::{Task, TaskId};
use crate::error::{Error, Result};

use super::events::{EventSink, HiveEvent};
use super::workload::{
    AgentWorkload, WorkloadStore, WorkloadThresholds, WorkloadUpdate, DEFAULT_DURATION_WINDOW,
};

/// Unique identifier for a steal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StealOperationId(pub Uuid);

impl StealOperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for StealOperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StealOperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StealOperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of a steal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealStatus {
    Planned,
    Executing,
    Completed,
    Failed,
}

impl StealStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, StealStatus::Completed | StealStatus::Failed)
    }
}

impl std::fmt::Display for StealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StealStatus::Planned => write!(f, "planned"),
            StealStatus::Executing => write!(f, "executing"),
            StealStatus::Completed => write!(f, "completed"),
            StealStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Measured effect of a steal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StealMetrics {
    pub tasks_stolen: usize,
    /// Fraction of the source's queue that moved.
    pub load_reduction: f64,
    /// Queue time saved on the source, from its average task duration.
    pub latency_improvement_ms: f64,
}

/// Record of one rebalancing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealOperation {
    pub id: StealOperationId,
    pub source_agent_id: AgentId,
    pub target_agent_id: AgentId,
    /// Tasks the placement layer reported as moved.
    pub task_ids: Vec<TaskId>,
    /// Number of tasks the coordinator asked to move.
    pub tasks_to_steal: usize,
    pub reason: String,
    pub status: StealStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub metrics: StealMetrics,
    pub error: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl StealOperation {
    fn planned(source: &AgentWorkload, target: &AgentWorkload, tasks_to_steal: usize) -> Self {
        Self {
            id: StealOperationId::new(),
            source_agent_id: source.agent_id.clone(),
            target_agent_id: target.agent_id.clone(),
            task_ids: Vec::new(),
            tasks_to_steal,
            reason: format!(
                "load balancing: {} has {} tasks, {} has {}",
                source.agent_id, source.task_count, target.agent_id, target.task_count
            ),
            status: StealStatus::Planned,
            start_time: Utc::now(),
            end_time: None,
            metrics: StealMetrics::default(),
            error: None,
            confirmed_at: None,
        }
    }

    fn finish(&mut self, status: StealStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

/// Tuning for the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct StealConfig {
    /// Minimum load difference before a steal is attempted.
    pub steal_threshold: usize,
    /// Upper bound on tasks moved by one operation.
    pub max_steal_batch: usize,
    /// Overloaded agents with fewer tasks than this are left alone.
    pub min_tasks_to_steal: usize,
    /// Targets must score strictly above this.
    pub min_target_score: f64,
    pub thresholds: WorkloadThresholds,
    pub duration_window: usize,
    pub duration_history_cap: usize,
    pub operation_retention: Duration,
}

impl Default for StealConfig {
    fn default() -> Self {
        Self {
            steal_threshold: 2,
            max_steal_batch: 5,
            min_tasks_to_steal: 2,
            min_target_score: 0.5,
            thresholds: WorkloadThresholds::default(),
            duration_window: DEFAULT_DURATION_WINDOW,
            duration_history_cap: 100,
            operation_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl StealConfig {
    pub fn with_steal_threshold(mut self, threshold: usize) -> Self {
        self.steal_threshold = threshold;
        self
    }

    pub fn with_max_steal_batch(mut self, batch: usize) -> Self {
        self.max_steal_batch = batch;
        self
    }

    pub fn with_min_tasks_to_steal(mut self, min: usize) -> Self {
        self.min_tasks_to_steal = min;
        self
    }

    pub fn with_thresholds(mut self, thresholds: WorkloadThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_operation_retention(mut self, retention: Duration) -> Self {
        self.operation_retention = retention;
        self
    }
}

/// A scored steal target.
#[derive(Debug, Clone, PartialEq)]
pub struct StealTarget {
    pub agent_id: AgentId,
    pub score: f64,
    pub load_difference: i64,
}

/// Aggregate view over all workloads and steal operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStats {
    pub total_agents: usize,
    pub overloaded_agents: usize,
    pub underloaded_agents: usize,
    pub total_tasks: usize,
    pub avg_task_count: f64,
    pub avg_cpu_usage: f64,
    pub total_steal_operations: usize,
    pub completed_steals: usize,
    pub failed_steals: usize,
    pub tasks_stolen: usize,
}

/// Outcome of a maintenance run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub trimmed_samples: usize,
    pub pruned_operations: usize,
}

fn capability_match(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.5;
    }
    let shared = a.intersection(b).count();
    shared as f64 / a.len().max(b.len()) as f64
}

fn capability_fraction(required: &HashSet<String>, offered: &HashSet<String>) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    required.intersection(offered).count() as f64 / required.len() as f64
}

/// Decides and records work steals between agents.
pub struct WorkStealingCoordinator {
    config: StealConfig,
    workloads: WorkloadStore,
    operations: RwLock<Vec<StealOperation>>,
    sink: Arc<dyn EventSink>,
    pass_guard: Mutex<()>,
}

impl WorkStealingCoordinator {
    pub fn new(config: StealConfig, sink: Arc<dyn EventSink>) -> Self {
        let workloads = WorkloadStore::with_duration_window(config.thresholds, config.duration_window);
        Self {
            config,
            workloads,
            operations: RwLock::new(Vec::new()),
            sink,
            pass_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StealConfig {
        &self.config
    }

    /// Start tracking an agent. Re-registering refreshes its profile.
    pub async fn register_agent(&self, profile: &AgentProfile) -> AgentWorkload {
        let workload = self.workloads.register(profile).await;
        info!(agent_id = %profile.id, capabilities = profile.capabilities.len(), "Registered agent");
        workload
    }

    pub async fn unregister_agent(&self, agent_id: &AgentId) -> Result<AgentWorkload> {
        let workload = self.workloads.unregister(agent_id).await?;
        info!(agent_id = %agent_id, task_count = workload.task_count, "Unregistered agent");
        Ok(workload)
    }

    pub async fn get_workload(&self, agent_id: &AgentId) -> Result<AgentWorkload> {
        self.workloads.get(agent_id).await
    }

    /// Merge a partial update into an agent's workload.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` when the agent is not registered.
    pub async fn update_agent_workload(
        &self,
        agent_id: &AgentId,
        update: &WorkloadUpdate,
    ) -> Result<AgentWorkload> {
        self.workloads.update(agent_id, update).await
    }

    /// Apply a lifecycle or telemetry event to the workload store.
    ///
    /// Events without an owning agent are ignored. `work:steal` and
    /// `task:reassigned` carry no count change here: the steal already
    /// moved the counts optimistically.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` when the event names an unregistered agent.
    pub async fn handle_event(&self, event: &HiveEvent) -> Result<()> {
        match event {
            HiveEvent::TaskAssigned { task_id, agent_id } => {
                let workload = self.workloads.adjust_task_count(agent_id, 1).await?;
                debug!(task_id = %task_id, agent_id = %agent_id, task_count = workload.task_count, "Task assigned");
            }
            HiveEvent::TaskCompleted {
                task_id,
                agent_id: Some(agent_id),
                duration_ms,
            } => {
                self.workloads.adjust_task_count(agent_id, -1).await?;
                let workload = self.workloads.record_duration(agent_id, *duration_ms).await?;
                debug!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    avg_ms = workload.avg_task_duration_ms,
                    "Task completed"
                );
            }
            HiveEvent::TaskFailed {
                task_id,
                agent_id: Some(agent_id),
                ..
            }
            | HiveEvent::TaskCancelled {
                task_id,
                agent_id: Some(agent_id),
                ..
            } => {
                let workload = self.workloads.adjust_task_count(agent_id, -1).await?;
                debug!(task_id = %task_id, agent_id = %agent_id, task_count = workload.task_count, event = event.name(), "Task left agent");
            }
            HiveEvent::AgentMetricsUpdated {
                agent_id,
                cpu_usage,
                memory_usage,
                task_count,
            } => {
                let update = WorkloadUpdate {
                    task_count: *task_count,
                    ..WorkloadUpdate::metrics(*cpu_usage, *memory_usage)
                };
                self.workloads.update(agent_id, &update).await?;
            }
            HiveEvent::TaskCompleted { agent_id: None, .. }
            | HiveEvent::TaskFailed { agent_id: None, .. }
            | HiveEvent::TaskCancelled { agent_id: None, .. }
            | HiveEvent::TaskReassigned { .. }
            | HiveEvent::WorkSteal { .. } => {}
        }
        Ok(())
    }

    /// Score `candidates` as steal targets for `source`.
    ///
    /// Returns the highest-scoring candidate whose score is strictly above
    /// `min_target_score`. Earlier candidates win ties.
    pub fn find_best_steal_target(
        &self,
        source: &AgentWorkload,
        candidates: &[AgentWorkload],
    ) -> Option<StealTarget> {
        let mut best: Option<StealTarget> = None;
        for candidate in candidates {
            if candidate.agent_id == source.agent_id {
                continue;
            }
            let load_difference = source.task_count as i64 - candidate.task_count as i64;
            let score = 0.4 * capability_match(&source.capabilities, &candidate.capabilities)
                + 0.4 * load_difference as f64
                + 0.1 * candidate.priority;

            if score <= self.config.min_target_score {
                continue;
            }
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(StealTarget {
                    agent_id: candidate.agent_id.clone(),
                    score,
                    load_difference,
                });
            }
        }
        best
    }

    /// Pick the agent best suited for initial placement of `task`.
    ///
    /// Only idle or active candidates are considered. Candidates the
    /// coordinator does not track count as empty.
    pub async fn find_best_agent(&self, task: &Task, candidates: &[AgentProfile]) -> Option<AgentId> {
        let mut best: Option<(f64, &AgentId)> = None;
        for candidate in candidates {
            if !candidate.status.accepts_work() {
                continue;
            }
            let task_count = match self.workloads.get(&candidate.id).await {
                Ok(workload) => workload.task_count,
                Err(_) => 0,
            };
            let score = 0.6 * (1.0 / (task_count as f64 + 1.0))
                + 0.4 * capability_fraction(&task.required_capabilities, &candidate.capabilities);
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, &candidate.id));
            }
        }
        best.map(|(_, id)| id.clone())
    }

    /// Run one rebalancing pass.
    ///
    /// Returns `None` without doing anything when another pass is in
    /// progress. Otherwise returns the operations attempted by this pass.
    pub async fn check_and_steal(&self) -> Option<Vec<StealOperation>> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("Rebalance pass already running, skipping");
            return None;
        };

        let snapshot = self.workloads.snapshot().await;
        let mut overloaded: Vec<&AgentWorkload> = snapshot
            .iter()
            .filter(|w| w.is_overloaded && w.task_count >= self.config.min_tasks_to_steal)
            .collect();
        let any_underloaded = snapshot.iter().any(|w| w.is_underloaded);
        if overloaded.is_empty() || !any_underloaded {
            return Some(Vec::new());
        }
        overloaded.sort_by(|a, b| b.task_count.cmp(&a.task_count));
        let sources: Vec<AgentId> = overloaded.into_iter().map(|w| w.agent_id.clone()).collect();

        let mut attempted = Vec::new();
        for source_id in sources {
            // Earlier steals in this pass may have changed the picture.
            let current = self.workloads.snapshot().await;
            let Some(source) = current.iter().find(|w| w.agent_id == source_id) else {
                continue;
            };
            if !source.is_overloaded || source.task_count < self.config.min_tasks_to_steal {
                continue;
            }
            let candidates: Vec<AgentWorkload> = current
                .iter()
                .filter(|w| w.is_underloaded && w.agent_id != source_id)
                .cloned()
                .collect();
            let Some(target) = self.find_best_steal_target(source, &candidates) else {
                debug!(agent_id = %source_id, "No acceptable steal target");
                continue;
            };
            let Some(target) = candidates.iter().find(|w| w.agent_id == target.agent_id) else {
                continue;
            };
            if let Some(operation) = self.execute_steal(source, target).await {
                attempted.push(operation);
            }
        }
        Some(attempted)
    }

    async fn execute_steal(&self, source: &AgentWorkload, target: &AgentWorkload) -> Option<StealOperation> {
        let load_difference = source.task_count.saturating_sub(target.task_count);
        if load_difference < self.config.steal_threshold {
            debug!(
                source = %source.agent_id,
                target = %target.agent_id,
                load_difference,
                "Load difference below steal threshold"
            );
            return None;
        }
        let tasks_to_steal = (load_difference / 2).min(self.config.max_steal_batch);
        if tasks_to_steal == 0 {
            return None;
        }

        let mut operation = StealOperation::planned(source, target, tasks_to_steal);
        self.store_operation(&operation).await;
        operation.status = StealStatus::Executing;
        self.store_operation(&operation).await;

        // Counts move before the event goes out so a listener confirming the
        // steal always finds the moved load. Completions may have landed
        // since the snapshot, so only what the source still holds moves.
        let moved = match self
            .workloads
            .transfer(&source.agent_id, &target.agent_id, tasks_to_steal)
            .await
        {
            Ok(transfer) => transfer.moved,
            Err(e) => {
                operation.error = Some(e.to_string());
                operation.finish(StealStatus::Failed);
                warn!(operation_id = %operation.id, error = %e, "Work steal failed");
                self.store_operation(&operation).await;
                return Some(operation);
            }
        };
        if moved == 0 {
            operation.error = Some(format!("{} has no tasks left to move", source.agent_id));
            operation.finish(StealStatus::Failed);
            debug!(operation_id = %operation.id, "Steal source drained before transfer");
            self.store_operation(&operation).await;
            return Some(operation);
        }
        operation.tasks_to_steal = moved;

        let event = HiveEvent::WorkSteal {
            operation_id: operation.id,
            source_agent_id: source.agent_id.clone(),
            target_agent_id: target.agent_id.clone(),
            tasks_to_steal: moved,
            reason: operation.reason.clone(),
        };

        // The operation only turns completed once the publish succeeded.
        // Holding the write lock across the non-blocking publish keeps a
        // confirming listener waiting until the final status is stored.
        let published = {
            let mut operations = self.operations.write().await;
            let published = self.sink.publish(event);
            match &published {
                Ok(()) => {
                    operation.metrics = StealMetrics {
                        tasks_stolen: moved,
                        load_reduction: moved as f64 / source.task_count as f64,
                        latency_improvement_ms: moved as f64 * source.avg_task_duration_ms,
                    };
                    operation.finish(StealStatus::Completed);
                }
                Err(e) => {
                    operation.error = Some(e.to_string());
                    operation.finish(StealStatus::Failed);
                }
            }
            if let Some(stored) = operations.iter_mut().find(|op| op.id == operation.id) {
                *stored = operation.clone();
            }
            published
        };

        match published {
            Ok(()) => {
                info!(
                    operation_id = %operation.id,
                    source = %source.agent_id,
                    target = %target.agent_id,
                    tasks = moved,
                    "Work steal completed"
                );
            }
            Err(e) => {
                if let Err(revert) = self
                    .workloads
                    .transfer(&target.agent_id, &source.agent_id, moved)
                    .await
                {
                    warn!(operation_id = %operation.id, error = %revert, "Could not restore workloads");
                }
                warn!(operation_id = %operation.id, error = %e, "Work steal failed");
            }
        }
        Some(operation)
    }

    async fn store_operation(&self, operation: &StealOperation) {
        let mut operations = self.operations.write().await;
        if let Some(stored) = operations.iter_mut().find(|op| op.id == operation.id) {
            *stored = operation.clone();
        } else {
            operations.push(operation.clone());
        }
    }

    /// Record which tasks the placement layer actually moved.
    ///
    /// When fewer tasks moved than were planned, the shortfall is handed
    /// back to the source so the counts match reality again. Extra moves
    /// are charged to the target the same way.
    ///
    /// # Errors
    ///
    /// Returns `StealOperationNotFound` for an unknown operation and
    /// `Validation` when the operation did not complete or was already
    /// confirmed.
    pub async fn confirm_steal(
        &self,
        operation_id: &StealOperationId,
        moved: Vec<TaskId>,
    ) -> Result<StealOperation> {
        let mut operations = self.operations.write().await;
        let stored = operations
            .iter_mut()
            .find(|op| op.id == *operation_id)
            .ok_or(Error::StealOperationNotFound(*operation_id))?;
        if stored.status != StealStatus::Completed {
            return Err(Error::Validation(format!(
                "steal {} is {} and cannot be confirmed",
                operation_id.short(),
                stored.status
            )));
        }
        if stored.confirmed_at.is_some() {
            return Err(Error::Validation(format!(
                "steal {} was already confirmed",
                operation_id.short()
            )));
        }

        let planned = stored.tasks_to_steal;
        let actual = moved.len();
        if actual < planned {
            self.workloads
                .transfer(&stored.target_agent_id, &stored.source_agent_id, planned - actual)
                .await?;
            warn!(
                operation_id = %stored.id,
                planned,
                actual,
                "Steal moved fewer tasks than planned, counts reconciled"
            );
        } else if actual > planned {
            self.workloads
                .transfer(&stored.source_agent_id, &stored.target_agent_id, actual - planned)
                .await?;
        }

        if planned > 0 {
            let scale = actual as f64 / planned as f64;
            stored.metrics.load_reduction *= scale;
            stored.metrics.latency_improvement_ms *= scale;
        }
        stored.metrics.tasks_stolen = actual;
        stored.task_ids = moved;
        stored.confirmed_at = Some(Utc::now());
        Ok(stored.clone())
    }

    /// Trim duration histories and prune expired steal operations.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let trimmed_samples = self
            .workloads
            .trim_histories(self.config.duration_history_cap)
            .await;

        let retention = chrono::Duration::from_std(self.config.operation_retention)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = Utc::now() - retention;
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|op| op.end_time.map_or(true, |end| end > cutoff));
        let pruned_operations = before - operations.len();
        drop(operations);

        if trimmed_samples > 0 || pruned_operations > 0 {
            debug!(trimmed_samples, pruned_operations, "Maintenance finished");
        }
        MaintenanceReport {
            trimmed_samples,
            pruned_operations,
        }
    }

    /// All retained operations in the order they were started.
    pub async fn get_steal_operations(&self) -> Vec<StealOperation> {
        self.operations.read().await.clone()
    }

    pub async fn get_workload_stats(&self) -> WorkloadStats {
        let workloads = self.workloads.snapshot().await;
        let operations = self.operations.read().await;

        let total_agents = workloads.len();
        let total_tasks: usize = workloads.iter().map(|w| w.task_count).sum();
        let (avg_task_count, avg_cpu_usage) = if total_agents == 0 {
            (0.0, 0.0)
        } else {
            let cpu: f64 = workloads.iter().map(|w| w.cpu_usage).sum();
            (
                total_tasks as f64 / total_agents as f64,
                cpu / total_agents as f64,
            )
        };

        WorkloadStats {
            total_agents,
            overloaded_agents: workloads.iter().filter(|w| w.is_overloaded).count(),
            underloaded_agents: workloads.iter().filter(|w| w.is_underloaded).count(),
            total_tasks,
            avg_task_count,
            avg_cpu_usage,
            total_steal_operations: operations.len(),
            completed_steals: operations
                .iter()
                .filter(|op| op.status == StealStatus::Completed)
                .count(),
            failed_steals: operations
                .iter()
                .filter(|op| op.status == StealStatus::Failed)
                .count(),
            tasks_stolen: operations.iter().map(|op| op.metrics.tasks_stolen).sum(),
        }
    }

    #[cfg(test)]
    async fn backdate_operations(&self, by: chrono::Duration) {
        for op in self.operations.write().await.iter_mut() {
            op.end_time = op.end_time.map(|end| end - by);
        }
    }
}

impl std::fmt::Debug for WorkStealingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingCoordinator")
            .field("config", &self.config)
            .field("workloads", &self.workloads)
            .finish()
    }
}
