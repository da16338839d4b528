//! Load balancing tests: workload tracking, steal decisions and drift
//! reconciliation.

use std::sync::Arc;
use std::time::Duration;

use hive::agent::{AgentId, AgentProfile, AgentStatus};
use hive::core::{Task, TaskSpec};
use hive::orchestration::{
    HiveEvent, StealConfig, StealStatus, WorkStealingCoordinator, WorkloadUpdate,
};
use hive::Error;

use crate::fixtures::{Harness, RecordingSink};

async fn overload(coordinator: &WorkStealingCoordinator, agent: &str, count: usize) {
    coordinator
        .update_agent_workload(&AgentId::from(agent), &WorkloadUpdate::task_count(count))
        .await
        .unwrap();
}

// ========== Workload Tracking Tests ==========

#[tokio::test]
async fn test_lifecycle_events_drive_task_counts() {
    let mut h = Harness::new();
    h.register("a").await;
    let tasks = h.queue_on("a", 3).await;
    h.pump().await;
    assert_eq!(h.task_count("a").await, 3);

    h.scheduler.start_task(&tasks[0].id).await.unwrap();
    h.scheduler.complete_task(&tasks[0].id, Some(400)).await.unwrap();
    h.scheduler.cancel_task(&tasks[1].id, "dropped", false).await.unwrap();
    h.pump().await;

    let workload = h.coordinator.get_workload(&AgentId::from("a")).await.unwrap();
    assert_eq!(workload.task_count, 1);
    assert_eq!(workload.avg_task_duration_ms, 400.0);
}

#[tokio::test]
async fn test_telemetry_overrides_counts_and_flags() {
    let h = Harness::new();
    h.register("a").await;
    h.coordinator
        .handle_event(&HiveEvent::AgentMetricsUpdated {
            agent_id: AgentId::from("a"),
            cpu_usage: 92.5,
            memory_usage: 40.0,
            task_count: Some(3),
        })
        .await
        .unwrap();

    let workload = h.coordinator.get_workload(&AgentId::from("a")).await.unwrap();
    assert_eq!(workload.task_count, 3);
    assert_eq!(workload.cpu_usage, 92.5);
    assert!(workload.is_overloaded);
    assert!(!workload.is_underloaded);
}

#[tokio::test]
async fn test_unregistered_agent_events_rejected() {
    let h = Harness::new();
    h.register("a").await;
    h.coordinator.unregister_agent(&AgentId::from("a")).await.unwrap();

    let result = h
        .coordinator
        .handle_event(&HiveEvent::TaskAssigned {
            task_id: hive::core::TaskId::new(),
            agent_id: AgentId::from("a"),
        })
        .await;
    assert!(matches!(result, Err(Error::AgentNotFound { .. })));
}

// ========== Steal Decision Tests ==========

#[tokio::test]
async fn test_steal_moves_half_the_difference_capped_by_batch() {
    let mut h = Harness::new();
    h.register("src").await;
    h.register("dst").await;
    overload(&h.coordinator, "src", 12).await;

    let ops = h.coordinator.check_and_steal().await.unwrap();
    assert_eq!(ops.len(), 1);
    let op = &ops[0];
    assert_eq!(op.status, StealStatus::Completed);
    assert_eq!(op.tasks_to_steal, 5);
    assert_eq!(op.source_agent_id, AgentId::from("src"));
    assert_eq!(op.target_agent_id, AgentId::from("dst"));
    assert!(op.end_time.is_some());

    assert_eq!(h.task_count("src").await, 7);
    assert_eq!(h.task_count("dst").await, 5);
    assert!(matches!(
        h.drain().as_slice(),
        [HiveEvent::WorkSteal { tasks_to_steal: 5, .. }]
    ));
}

#[tokio::test]
async fn test_no_steal_without_underloaded_target() {
    let h = Harness::new();
    h.register("src").await;
    h.register("dst").await;
    overload(&h.coordinator, "src", 12).await;
    overload(&h.coordinator, "dst", 4).await;

    let ops = h.coordinator.check_and_steal().await.unwrap();
    assert!(ops.is_empty());
    assert_eq!(h.task_count("src").await, 12);
}

#[tokio::test]
async fn test_steal_threshold_blocks_small_differences() {
    let h = Harness::with_config(
        Default::default(),
        StealConfig::default().with_steal_threshold(20),
    );
    h.register("src").await;
    h.register("dst").await;
    overload(&h.coordinator, "src", 12).await;

    let ops = h.coordinator.check_and_steal().await.unwrap();
    assert!(ops.is_empty());
    assert!(h.coordinator.get_steal_operations().await.is_empty());
}

#[tokio::test]
async fn test_failed_publish_restores_counts() {
    let coordinator = WorkStealingCoordinator::new(
        StealConfig::default(),
        Arc::new(RecordingSink::failing()),
    );
    coordinator.register_agent(&AgentProfile::new("src")).await;
    coordinator.register_agent(&AgentProfile::new("dst")).await;
    overload(&coordinator, "src", 10).await;

    let ops = coordinator.check_and_steal().await.unwrap();
    assert_eq!(ops[0].status, StealStatus::Failed);
    assert!(ops[0].error.as_deref().unwrap_or_default().contains("sink offline"));

    let src = coordinator.get_workload(&AgentId::from("src")).await.unwrap();
    let dst = coordinator.get_workload(&AgentId::from("dst")).await.unwrap();
    assert_eq!((src.task_count, dst.task_count), (10, 0));

    let stats = coordinator.get_workload_stats().await;
    assert_eq!(stats.failed_steals, 1);
    assert_eq!(stats.tasks_stolen, 0);
}

#[tokio::test]
async fn test_find_best_agent_skips_unavailable() {
    let h = Harness::new();
    let busy = AgentProfile::new("busy")
        .with_capabilities(["gpu"])
        .with_status(AgentStatus::Busy);
    let capable = AgentProfile::new("capable").with_capabilities(["gpu"]);
    let idle = AgentProfile::new("idle");
    for profile in [&busy, &capable, &idle] {
        h.coordinator.register_agent(profile).await;
    }
    overload(&h.coordinator, "capable", 1).await;

    let task = Task::from_spec(TaskSpec::new("train", "x").with_capability("gpu"), 50);
    let candidates = vec![busy, capable, idle];
    // 0.6 / 2 + 0.4 beats 0.6 / 1 + 0.
    assert_eq!(
        h.coordinator.find_best_agent(&task, &candidates).await,
        Some(AgentId::from("capable"))
    );
    assert_eq!(h.coordinator.find_best_agent(&task, &candidates[..1]).await, None);
}

// ========== Reconciliation Tests ==========

#[tokio::test]
async fn test_confirm_steal_reconciles_shortfall() {
    let mut h = Harness::new();
    h.register("src").await;
    h.register("dst").await;
    let tasks = h.queue_on("src", 10).await;
    h.pump().await;
    assert_eq!(h.task_count("src").await, 10);

    // Running tasks stay with their agent, so only two can move.
    for task in &tasks[..8] {
        h.scheduler.start_task(&task.id).await.unwrap();
    }
    let op = h.coordinator.check_and_steal().await.unwrap().remove(0);
    assert_eq!(op.tasks_to_steal, 5);

    let moved = h
        .scheduler
        .reassign_tasks(
            &AgentId::from("src"),
            &AgentId::from("dst"),
            op.tasks_to_steal,
            &Default::default(),
        )
        .await;
    assert_eq!(moved.len(), 2);

    let confirmed = h.coordinator.confirm_steal(&op.id, moved.clone()).await.unwrap();
    assert_eq!(confirmed.task_ids, moved);
    assert_eq!(confirmed.metrics.tasks_stolen, 2);
    assert!((confirmed.metrics.load_reduction - 0.2).abs() < 1e-9);
    assert!(confirmed.confirmed_at.is_some());
    assert_eq!(h.task_count("src").await, 8);
    assert_eq!(h.task_count("dst").await, 2);
    assert_eq!(
        h.scheduler.tasks_for_agent(&AgentId::from("dst")).await.len(),
        2
    );

    assert!(matches!(
        h.coordinator.confirm_steal(&op.id, Vec::new()).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_confirm_unknown_operation() {
    let h = Harness::new();
    let result = h
        .coordinator
        .confirm_steal(&hive::orchestration::StealOperationId::new(), Vec::new())
        .await;
    assert!(matches!(result, Err(Error::StealOperationNotFound(_))));
}

// ========== Maintenance and Stats Tests ==========

#[tokio::test]
async fn test_zero_retention_prunes_finished_operations() {
    let h = Harness::with_config(
        Default::default(),
        StealConfig::default().with_operation_retention(Duration::ZERO),
    );
    h.register("src").await;
    h.register("dst").await;
    overload(&h.coordinator, "src", 10).await;
    h.coordinator.check_and_steal().await.unwrap();
    assert_eq!(h.coordinator.get_steal_operations().await.len(), 1);

    let report = h.coordinator.run_maintenance().await;
    assert_eq!(report.pruned_operations, 1);
    assert!(h.coordinator.get_steal_operations().await.is_empty());
}

#[tokio::test]
async fn test_workload_stats_aggregate() {
    let h = Harness::new();
    h.register("src").await;
    h.register("dst").await;
    h.register("spare").await;
    overload(&h.coordinator, "src", 10).await;

    let before = h.coordinator.get_workload_stats().await;
    assert_eq!(before.total_agents, 3);
    assert_eq!(before.overloaded_agents, 1);
    assert_eq!(before.underloaded_agents, 2);
    assert_eq!(before.total_tasks, 10);

    h.coordinator.check_and_steal().await.unwrap();
    let after = h.coordinator.get_workload_stats().await;
    assert_eq!(after.total_tasks, 10);
    assert_eq!(after.completed_steals, 1);
    assert_eq!(after.tasks_stolen, 5);
    assert_eq!(after.overloaded_agents, 0);
}
