//! Per-agent workload accounting.
//!
//! The `WorkloadStore` keeps one `AgentWorkload` per registered agent and
//! recomputes the overload/underload flags whenever a record changes.
//! The agent map sits behind an `RwLock` and each record behind its own
//! `Mutex`, so updates for different agents never contend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::agent::{AgentId, AgentProfile};
use crate::error::{Error, Result};

/// Default number of recent durations averaged into `avg_task_duration_ms`.
pub const DEFAULT_DURATION_WINDOW: usize = 50;

/// Classification thresholds for agent load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkloadThresholds {
    /// Overloaded when `task_count` is above this.
    pub overload_task_count: usize,
    /// Overloaded when `cpu_usage` is above this.
    pub overload_cpu: f64,
    /// Underloaded requires `task_count` below this.
    pub underload_task_count: usize,
    /// Underloaded requires `cpu_usage` below this.
    pub underload_cpu: f64,
}

impl Default for WorkloadThresholds {
    fn default() -> Self {
        Self {
            overload_task_count: 8,
            overload_cpu: 80.0,
            underload_task_count: 2,
            underload_cpu: 30.0,
        }
    }
}

/// Live accounting record for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWorkload {
    pub agent_id: AgentId,
    pub task_count: usize,
    pub avg_task_duration_ms: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub priority: f64,
    pub capabilities: HashSet<String>,
    pub is_overloaded: bool,
    pub is_underloaded: bool,
    pub last_updated: DateTime<Utc>,
}

impl AgentWorkload {
    /// Zeroed workload for a freshly registered agent.
    pub fn new(profile: &AgentProfile, thresholds: &WorkloadThresholds) -> Self {
        let mut workload = Self {
            agent_id: profile.id.clone(),
            task_count: 0,
            avg_task_duration_ms: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            priority: profile.priority,
            capabilities: profile.capabilities.clone(),
            is_overloaded: false,
            is_underloaded: false,
            last_updated: Utc::now(),
        };
        workload.recompute_flags(thresholds);
        workload
    }

    /// Recompute the derived load flags from the current counters.
    pub fn recompute_flags(&mut self, thresholds: &WorkloadThresholds) {
        self.is_overloaded = self.task_count > thresholds.overload_task_count
            || self.cpu_usage > thresholds.overload_cpu;
        self.is_underloaded = self.task_count < thresholds.underload_task_count
            && self.cpu_usage < thresholds.underload_cpu;
    }

    fn apply(&mut self, update: &WorkloadUpdate, thresholds: &WorkloadThresholds) {
        if let Some(task_count) = update.task_count {
            self.task_count = task_count;
        }
        if let Some(avg) = update.avg_task_duration_ms {
            self.avg_task_duration_ms = avg;
        }
        if let Some(cpu) = update.cpu_usage {
            self.cpu_usage = cpu;
        }
        if let Some(memory) = update.memory_usage {
            self.memory_usage = memory;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(capabilities) = &update.capabilities {
            self.capabilities = capabilities.clone();
        }
        self.last_updated = Utc::now();
        self.recompute_flags(thresholds);
    }
}

/// Partial update merged into an `AgentWorkload`. `None` fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadUpdate {
    pub task_count: Option<usize>,
    pub avg_task_duration_ms: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub priority: Option<f64>,
    pub capabilities: Option<HashSet<String>>,
}

impl WorkloadUpdate {
    pub fn task_count(task_count: usize) -> Self {
        Self {
            task_count: Some(task_count),
            ..Default::default()
        }
    }

    pub fn metrics(cpu_usage: f64, memory_usage: f64) -> Self {
        Self {
            cpu_usage: Some(cpu_usage),
            memory_usage: Some(memory_usage),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct AgentRecord {
    workload: AgentWorkload,
    durations: VecDeque<u64>,
}

/// Result of [`WorkloadStore::transfer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    /// Count actually moved, at most what was asked for.
    pub moved: usize,
    pub source: AgentWorkload,
    pub target: AgentWorkload,
}

/// In-memory map of agent id to workload record.
pub struct WorkloadStore {
    agents: RwLock<HashMap<AgentId, Arc<Mutex<AgentRecord>>>>,
    thresholds: WorkloadThresholds,
    duration_window: usize,
}

impl WorkloadStore {
    pub fn new(thresholds: WorkloadThresholds) -> Self {
        Self::with_duration_window(thresholds, DEFAULT_DURATION_WINDOW)
    }

    pub fn with_duration_window(thresholds: WorkloadThresholds, duration_window: usize) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            thresholds,
            duration_window: duration_window.max(1),
        }
    }

    async fn record(&self, agent_id: &AgentId) -> Result<Arc<Mutex<AgentRecord>>> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound {
                id: agent_id.clone(),
            })
    }

    /// Create a zeroed record for the agent. Registering a known agent
    /// refreshes its capabilities and priority and keeps its counters.
    pub async fn register(&self, profile: &AgentProfile) -> AgentWorkload {
        let mut agents = self.agents.write().await;
        if let Some(existing) = agents.get(&profile.id) {
            let mut record = existing.lock().await;
            let update = WorkloadUpdate {
                priority: Some(profile.priority),
                capabilities: Some(profile.capabilities.clone()),
                ..Default::default()
            };
            record.workload.apply(&update, &self.thresholds);
            return record.workload.clone();
        }

        let workload = AgentWorkload::new(profile, &self.thresholds);
        agents.insert(
            profile.id.clone(),
            Arc::new(Mutex::new(AgentRecord {
                workload: workload.clone(),
                durations: VecDeque::new(),
            })),
        );
        workload
    }

    /// Remove the agent's record, returning its last state.
    pub async fn unregister(&self, agent_id: &AgentId) -> Result<AgentWorkload> {
        let removed = self
            .agents
            .write()
            .await
            .remove(agent_id)
            .ok_or_else(|| Error::AgentNotFound {
                id: agent_id.clone(),
            })?;
        let record = removed.lock().await;
        Ok(record.workload.clone())
    }

    pub async fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    pub async fn get(&self, agent_id: &AgentId) -> Result<AgentWorkload> {
        let record = self.record(agent_id).await?;
        let record = record.lock().await;
        Ok(record.workload.clone())
    }

    /// Snapshot of every workload, ordered by agent id.
    pub async fn snapshot(&self) -> Vec<AgentWorkload> {
        let records: Vec<Arc<Mutex<AgentRecord>>> =
            self.agents.read().await.values().cloned().collect();
        let mut workloads = Vec::with_capacity(records.len());
        for record in records {
            workloads.push(record.lock().await.workload.clone());
        }
        workloads.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        workloads
    }

    /// Merge a partial update into the agent's record.
    pub async fn update(&self, agent_id: &AgentId, update: &WorkloadUpdate) -> Result<AgentWorkload> {
        let record = self.record(agent_id).await?;
        let mut record = record.lock().await;
        record.workload.apply(update, &self.thresholds);
        Ok(record.workload.clone())
    }

    /// Add `delta` to the task count, saturating at zero.
    pub async fn adjust_task_count(&self, agent_id: &AgentId, delta: i64) -> Result<AgentWorkload> {
        let record = self.record(agent_id).await?;
        let mut record = record.lock().await;
        let current = record.workload.task_count as i64;
        let next = (current + delta).max(0) as usize;
        record
            .workload
            .apply(&WorkloadUpdate::task_count(next), &self.thresholds);
        Ok(record.workload.clone())
    }

    /// Record an observed task duration and refresh the rolling average.
    pub async fn record_duration(&self, agent_id: &AgentId, duration_ms: u64) -> Result<AgentWorkload> {
        let record = self.record(agent_id).await?;
        let mut record = record.lock().await;
        record.durations.push_back(duration_ms);

        let window = record.durations.len().min(self.duration_window);
        // Summed as f64: a few huge samples must not overflow the window.
        let sum: f64 = record
            .durations
            .iter()
            .rev()
            .take(window)
            .map(|&ms| ms as f64)
            .sum();
        let avg = sum / window as f64;

        record.workload.apply(
            &WorkloadUpdate {
                avg_task_duration_ms: Some(avg),
                ..Default::default()
            },
            &self.thresholds,
        );
        Ok(record.workload.clone())
    }

    /// Number of duration samples retained for the agent.
    pub async fn duration_samples(&self, agent_id: &AgentId) -> Result<usize> {
        let record = self.record(agent_id).await?;
        let record = record.lock().await;
        Ok(record.durations.len())
    }

    /// Move up to `count` from the source's task count to the target's.
    ///
    /// Never moves more than the source currently holds, so the combined
    /// count is unchanged. Both records are locked in agent-id order so
    /// concurrent transfers in opposite directions cannot deadlock.
    pub async fn transfer(
        &self,
        source: &AgentId,
        target: &AgentId,
        count: usize,
    ) -> Result<Transfer> {
        if source == target {
            return Err(Error::Validation(
                "cannot transfer load from an agent to itself".to_string(),
            ));
        }
        let source_record = self.record(source).await?;
        let target_record = self.record(target).await?;

        let (mut first, mut second) = if source < target {
            let first = source_record.lock().await;
            let second = target_record.lock().await;
            (first, second)
        } else {
            let second = target_record.lock().await;
            let first = source_record.lock().await;
            (first, second)
        };

        let moved = count.min(first.workload.task_count);
        let source_count = first.workload.task_count - moved;
        first
            .workload
            .apply(&WorkloadUpdate::task_count(source_count), &self.thresholds);
        let target_count = second.workload.task_count + moved;
        second
            .workload
            .apply(&WorkloadUpdate::task_count(target_count), &self.thresholds);

        Ok(Transfer {
            moved,
            source: first.workload.clone(),
            target: second.workload.clone(),
        })
    }

    /// Drop the oldest duration samples beyond `cap` for every agent.
    ///
    /// Returns the number of samples removed.
    pub async fn trim_histories(&self, cap: usize) -> usize {
        let records: Vec<Arc<Mutex<AgentRecord>>> =
            self.agents.read().await.values().cloned().collect();
        let mut trimmed = 0;
        for record in records {
            let mut record = record.lock().await;
            while record.durations.len() > cap {
                record.durations.pop_front();
                trimmed += 1;
            }
        }
        trimmed
    }
}

impl std::fmt::Debug for WorkloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadStore")
            .field("thresholds", &self.thresholds)
            .field("duration_window", &self.duration_window)
            .finish()
    }
}
