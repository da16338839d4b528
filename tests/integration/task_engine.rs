//! Task lifecycle tests against the public scheduler API.

use std::sync::Arc;

use hive::agent::AgentId;
use hive::core::{Dependency, DependencyKind, StatusKind, TaskSpec, TaskStatus};
use hive::orchestration::{
    HiveEvent, PriorityRange, SortField, SortSpec, TaskFilter, TaskQuery,
};
use hive::Error;

use crate::fixtures::{Harness, MockExecutor};

// ========== Lifecycle Tests ==========

#[tokio::test]
async fn test_full_lifecycle_publishes_events() {
    let mut h = Harness::new();
    let task = h
        .scheduler
        .create_task(TaskSpec::new("build", "compile workspace").with_priority(70))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    h.scheduler.assign_task(&task.id, AgentId::from("a")).await.unwrap();
    let running = h.scheduler.start_task(&task.id).await.unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert!(running.started_at.is_some());

    let done = h.scheduler.complete_task(&task.id, Some(1200)).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.completed_at.is_some());

    let events = h.drain();
    assert_eq!(
        events,
        vec![
            HiveEvent::TaskAssigned {
                task_id: task.id,
                agent_id: AgentId::from("a"),
            },
            HiveEvent::TaskCompleted {
                task_id: task.id,
                agent_id: Some(AgentId::from("a")),
                duration_ms: 1200,
            },
        ]
    );
}

#[tokio::test]
async fn test_terminal_tasks_reject_transitions() {
    let h = Harness::new();
    let task = h.scheduler.create_task(TaskSpec::new("build", "x")).await.unwrap();
    h.scheduler.start_task(&task.id).await.unwrap();
    h.scheduler.fail_task(&task.id, "compiler crashed").await.unwrap();

    assert!(matches!(
        h.scheduler.start_task(&task.id).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(
        h.scheduler.cancel_task(&task.id, "late", false).await,
        Err(Error::InvalidTransition { .. })
    ));
    let report = h.scheduler.get_task_status(&task.id).await.unwrap();
    assert_eq!(
        report.task.status,
        TaskStatus::Failed {
            error: "compiler crashed".to_string()
        }
    );
}

// ========== Dependency Tests ==========

#[tokio::test]
async fn test_finish_to_start_gates_until_completion() {
    let h = Harness::new();
    let fetch = h.scheduler.create_task(TaskSpec::new("fetch", "x")).await.unwrap();
    let build = h
        .scheduler
        .create_task(TaskSpec::new("build", "x").depends_on(fetch.id))
        .await
        .unwrap();

    assert!(matches!(
        h.scheduler.start_task(&build.id).await,
        Err(Error::DependenciesUnsatisfied { unsatisfied: 1, .. })
    ));
    let eligible: Vec<_> = h
        .scheduler
        .eligible_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(eligible, vec![fetch.id]);

    h.scheduler.start_task(&fetch.id).await.unwrap();
    h.scheduler.complete_task(&fetch.id, None).await.unwrap();

    let report = h.scheduler.get_task_status(&build.id).await.unwrap();
    assert!(report.eligible);
    assert!(report.dependencies.iter().all(|d| d.satisfied));
    h.scheduler.start_task(&build.id).await.unwrap();
}

#[tokio::test]
async fn test_non_gating_dependency_kinds_do_not_block_start() {
    let h = Harness::new();
    let upstream = h.scheduler.create_task(TaskSpec::new("a", "x")).await.unwrap();
    let task = h
        .scheduler
        .create_task(
            TaskSpec::new("b", "x")
                .with_dependency(Dependency::new(upstream.id, DependencyKind::FinishToFinish)),
        )
        .await
        .unwrap();

    let report = h.scheduler.get_task_status(&task.id).await.unwrap();
    assert!(!report.dependencies[0].satisfied);
    assert!(report.eligible);
    h.scheduler.start_task(&task.id).await.unwrap();
}

#[tokio::test]
async fn test_failed_dependency_blocks_forever() {
    let h = Harness::new();
    let upstream = h.scheduler.create_task(TaskSpec::new("a", "x")).await.unwrap();
    let task = h
        .scheduler
        .create_task(TaskSpec::new("b", "x").depends_on(upstream.id))
        .await
        .unwrap();
    h.scheduler.start_task(&upstream.id).await.unwrap();
    h.scheduler.fail_task(&upstream.id, "boom").await.unwrap();

    // Standalone tasks have no error policy, the dependent just waits.
    let report = h.scheduler.get_task_status(&task.id).await.unwrap();
    assert_eq!(report.task.status, TaskStatus::Pending);
    assert!(!report.eligible);
}

// ========== Query Tests ==========

#[tokio::test]
async fn test_query_filters_sorts_and_pages() {
    let h = Harness::new();
    for (priority, tag) in [(10, "docs"), (90, "ci"), (60, "ci"), (75, "release"), (40, "ci")] {
        h.scheduler
            .create_task(TaskSpec::new("build", "x").with_priority(priority).with_tag(tag))
            .await
            .unwrap();
    }

    let query = TaskQuery::new()
        .with_filter(TaskFilter {
            tags: ["ci".to_string(), "release".to_string()].into_iter().collect(),
            priority: Some(PriorityRange::at_least(50)),
            ..Default::default()
        })
        .sorted_by(SortSpec::desc(SortField::Priority))
        .with_page(1, 1);
    let page = h.scheduler.list_tasks(&query).await;

    assert_eq!(page.total, 3);
    assert_eq!(page.tasks.len(), 1);
    assert_eq!(page.tasks[0].priority, 75);
}

#[tokio::test]
async fn test_query_by_status_and_agent() {
    let h = Harness::new();
    let tasks = h.queue_on("a", 3).await;
    h.scheduler.start_task(&tasks[0].id).await.unwrap();
    h.scheduler.create_task(TaskSpec::new("job", "unassigned")).await.unwrap();

    let pending_on_a = h
        .scheduler
        .list_tasks(&TaskQuery::new().with_filter(TaskFilter {
            status: Some(StatusKind::Pending),
            assigned_agent: Some(AgentId::from("a")),
            ..Default::default()
        }))
        .await;
    assert_eq!(pending_on_a.total, 2);
    assert_eq!(h.scheduler.tasks_for_agent(&AgentId::from("a")).await.len(), 3);
}

// ========== Cancellation Tests ==========

#[tokio::test]
async fn test_cancel_running_with_rollback_aborts_on_agent() {
    let executor = Arc::new(MockExecutor::default());
    let mut h = Harness::with_executor(executor.clone());
    let task = h.queue_on("a", 1).await.remove(0);
    h.scheduler.start_task(&task.id).await.unwrap();
    h.drain();

    let cancelled = h.scheduler.cancel_task(&task.id, "superseded", true).await.unwrap();
    assert_eq!(cancelled.status.kind(), StatusKind::Cancelled);
    assert_eq!(
        executor.aborted.lock().unwrap().as_slice(),
        &[(task.id, Some(AgentId::from("a")))]
    );
    assert!(matches!(
        h.drain().as_slice(),
        [HiveEvent::TaskCancelled { reason, .. }] if reason == "superseded"
    ));
}

#[tokio::test]
async fn test_cancel_without_rollback_or_pending_skips_abort() {
    let executor = Arc::new(MockExecutor::default());
    let h = Harness::with_executor(executor.clone());

    let pending = h.scheduler.create_task(TaskSpec::new("job", "x")).await.unwrap();
    h.scheduler.cancel_task(&pending.id, "not needed", true).await.unwrap();

    let running = h.scheduler.create_task(TaskSpec::new("job", "y")).await.unwrap();
    h.scheduler.start_task(&running.id).await.unwrap();
    h.scheduler.cancel_task(&running.id, "stop", false).await.unwrap();

    assert!(executor.aborted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_succeeds_when_abort_fails() {
    let executor = Arc::new(MockExecutor {
        fail: true,
        ..Default::default()
    });
    let h = Harness::with_executor(executor.clone());
    let task = h.scheduler.create_task(TaskSpec::new("job", "x")).await.unwrap();
    h.scheduler.start_task(&task.id).await.unwrap();

    let cancelled = h.scheduler.cancel_task(&task.id, "stop", true).await.unwrap();
    assert_eq!(cancelled.status.kind(), StatusKind::Cancelled);
    assert_eq!(executor.aborted.lock().unwrap().len(), 1);
}

// ========== Wire Format Tests ==========

#[tokio::test]
async fn test_events_use_wire_names() {
    let mut h = Harness::new();
    let task = h.queue_on("a", 1).await.remove(0);
    let event = h.drain().remove(0);

    let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
    assert_eq!(json["event"], "task:assigned");
    assert_eq!(json["agent_id"], "a");
    assert_eq!(json["task_id"], task.id.to_string());
    assert_eq!(HiveEvent::from_json(&event.to_json().unwrap()).unwrap(), event);
}
