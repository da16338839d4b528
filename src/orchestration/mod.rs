//! Orchestration layer for the hive engine.
//!
//! This module holds the components that decide what runs where: the task
//! scheduler that owns tasks and workflows, the work-stealing coordinator
//! that balances load across agents, and the event bus connecting them to
//! the agent execution layer.

mod events;
mod query;
mod runtime;
mod scheduler;
mod stealing;
mod workload;

pub use events::{EventBus, EventSink, HiveEvent, DEFAULT_BUS_CAPACITY};
pub use query::{
    PriorityRange, SortDirection, SortField, SortSpec, TaskFilter, TaskList, TaskQuery,
};
pub use runtime::Hive;
pub use scheduler::{
    SchedulerConfig, TaskExecutor, TaskScheduler, TaskStatusReport, UPSTREAM_FAILURE,
};
pub use stealing::{
    MaintenanceReport, StealConfig, StealMetrics, StealOperation, StealOperationId, StealStatus,
    StealTarget, WorkStealingCoordinator, WorkloadStats,
};
pub use workload::{
    AgentWorkload, Transfer, WorkloadStore, WorkloadThresholds, WorkloadUpdate, DEFAULT_DURATION_WINDOW,
};
