use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::orchestration::{SchedulerConfig, StealConfig, WorkloadThresholds};
use crate::{Error, Result};

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub default_priority: u8,
    pub abort_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_priority: crate::core::DEFAULT_PRIORITY,
            abort_timeout_ms: 5000,
        }
    }
}

/// `[stealing]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealingSettings {
    pub steal_interval_ms: u64,
    pub steal_threshold: usize,
    pub max_steal_batch: usize,
    pub min_tasks_to_steal: usize,
    pub min_target_score: f64,
    pub overload_task_count: usize,
    pub overload_cpu: f64,
    pub underload_task_count: usize,
    pub underload_cpu: f64,
    pub duration_window: usize,
    pub duration_history_cap: usize,
    pub operation_retention_secs: u64,
    pub maintenance_interval_ms: u64,
}

impl Default for StealingSettings {
    fn default() -> Self {
        Self {
            steal_interval_ms: 5000,
            steal_threshold: 2,
            max_steal_batch: 5,
            min_tasks_to_steal: 2,
            min_target_score: 0.5,
            overload_task_count: 8,
            overload_cpu: 80.0,
            underload_task_count: 2,
            underload_cpu: 30.0,
            duration_window: 50,
            duration_history_cap: 100,
            operation_retention_secs: 86_400,
            maintenance_interval_ms: 60_000,
        }
    }
}

/// `[bus]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub capacity: usize,
    /// Apply `work:steal` decisions to the local scheduler's assignments.
    pub apply_steals_locally: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            capacity: crate::orchestration::DEFAULT_BUS_CAPACITY,
            apply_steals_locally: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub stealing: StealingSettings,
    #[serde(default)]
    pub bus: BusSettings,
}

impl Config {
    pub fn hive_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hive"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.toml"))
    }

    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.log"))
    }

    /// Load `~/.hive/hive.toml`, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            steal_interval_ms = config.stealing.steal_interval_ms,
            bus_capacity = config.bus.capacity,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!(dir = %dir.display(), "Creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.stealing;
        if self.scheduler.default_priority > crate::core::MAX_PRIORITY {
            return Err(Error::Validation(format!(
                "scheduler.default_priority must be at most {}",
                crate::core::MAX_PRIORITY
            )));
        }
        if self.scheduler.abort_timeout_ms == 0 {
            return Err(Error::Validation(
                "scheduler.abort_timeout_ms must be positive".to_string(),
            ));
        }
        if s.steal_interval_ms == 0 || s.maintenance_interval_ms == 0 {
            return Err(Error::Validation(
                "stealing intervals must be positive".to_string(),
            ));
        }
        if s.max_steal_batch == 0 {
            return Err(Error::Validation(
                "stealing.max_steal_batch must be at least 1".to_string(),
            ));
        }
        if s.duration_window == 0 || s.duration_history_cap < s.duration_window {
            return Err(Error::Validation(
                "stealing.duration_history_cap must be at least duration_window (> 0)"
                    .to_string(),
            ));
        }
        if s.underload_task_count > s.overload_task_count || s.underload_cpu > s.overload_cpu {
            return Err(Error::Validation(
                "underload thresholds must not exceed overload thresholds".to_string(),
            ));
        }
        if self.bus.capacity == 0 {
            return Err(Error::Validation("bus.capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_default_priority(self.scheduler.default_priority)
            .with_abort_timeout(Duration::from_millis(self.scheduler.abort_timeout_ms))
    }

    pub fn steal_config(&self) -> StealConfig {
        let s = &self.stealing;
        StealConfig {
            steal_threshold: s.steal_threshold,
            max_steal_batch: s.max_steal_batch,
            min_tasks_to_steal: s.min_tasks_to_steal,
            min_target_score: s.min_target_score,
            thresholds: WorkloadThresholds {
                overload_task_count: s.overload_task_count,
                overload_cpu: s.overload_cpu,
                underload_task_count: s.underload_task_count,
                underload_cpu: s.underload_cpu,
            },
            duration_window: s.duration_window,
            duration_history_cap: s.duration_history_cap,
            operation_retention: Duration::from_secs(s.operation_retention_secs),
        }
    }

    pub fn steal_interval(&self) -> Duration {
        Duration::from_millis(self.stealing.steal_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.stealing.maintenance_interval_ms)
    }
}
