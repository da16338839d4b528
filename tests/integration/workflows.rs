//! Workflow policy tests: parallelism, error strategies and progress.

use hive::core::{Task, TaskSpec, TaskStatus};
use hive::orchestration::{HiveEvent, TaskScheduler, UPSTREAM_FAILURE};
use hive::workflow::{ErrorStrategy, ParallelismStrategy, WorkflowId, WorkflowSpec, WorkflowStatus};
use hive::Error;

use crate::fixtures::Harness;

async fn member(scheduler: &TaskScheduler, workflow_id: WorkflowId, priority: u8) -> Task {
    scheduler
        .create_task(
            TaskSpec::new("step", &format!("step p{}", priority))
                .with_priority(priority)
                .in_workflow(workflow_id),
        )
        .await
        .unwrap()
}

// ========== Parallelism Tests ==========

#[tokio::test]
async fn test_max_concurrent_limits_running_tasks() {
    let h = Harness::new();
    let workflow = h
        .scheduler
        .create_workflow(WorkflowSpec::new("release").with_max_concurrent(2))
        .await
        .unwrap();
    let mut tasks = Vec::new();
    for priority in [10, 20, 30] {
        tasks.push(member(&h.scheduler, workflow.id, priority).await);
    }

    h.scheduler.start_task(&tasks[0].id).await.unwrap();
    h.scheduler.start_task(&tasks[1].id).await.unwrap();
    assert!(matches!(
        h.scheduler.start_task(&tasks[2].id).await,
        Err(Error::WorkflowAtCapacity { max: 2, .. })
    ));
    assert!(h.scheduler.eligible_tasks(Some(&workflow.id)).await.unwrap().is_empty());

    h.scheduler.complete_task(&tasks[0].id, None).await.unwrap();
    let next = h.scheduler.eligible_tasks(Some(&workflow.id)).await.unwrap();
    assert_eq!(next.len(), 1);
    h.scheduler.start_task(&tasks[2].id).await.unwrap();
}

#[tokio::test]
async fn test_priority_strategy_orders_and_truncates() {
    let h = Harness::new();
    let workflow = h
        .scheduler
        .create_workflow(
            WorkflowSpec::new("ci")
                .with_max_concurrent(2)
                .with_strategy(ParallelismStrategy::PriorityBased),
        )
        .await
        .unwrap();
    for priority in [40, 90, 65] {
        member(&h.scheduler, workflow.id, priority).await;
    }

    let eligible = h.scheduler.eligible_tasks(Some(&workflow.id)).await.unwrap();
    let priorities: Vec<u8> = eligible.iter().map(|t| t.priority).collect();
    assert_eq!(priorities, vec![90, 65]);
}

#[tokio::test]
async fn test_breadth_first_prefers_shallow_tasks() {
    let h = Harness::new();
    let workflow = h
        .scheduler
        .create_workflow(
            WorkflowSpec::new("pipeline").with_strategy(ParallelismStrategy::BreadthFirst),
        )
        .await
        .unwrap();
    let root = member(&h.scheduler, workflow.id, 10).await;
    let other_root = member(&h.scheduler, workflow.id, 5).await;
    let child = h
        .scheduler
        .create_task(
            TaskSpec::new("step", "child")
                .with_priority(99)
                .depends_on(root.id)
                .in_workflow(workflow.id),
        )
        .await
        .unwrap();

    h.scheduler.start_task(&root.id).await.unwrap();
    h.scheduler.complete_task(&root.id, None).await.unwrap();

    let eligible: Vec<_> = h
        .scheduler
        .eligible_tasks(Some(&workflow.id))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(eligible, vec![other_root.id, child.id]);
}

// ========== Error Strategy Tests ==========

#[tokio::test]
async fn test_fail_fast_fails_pending_siblings() {
    let mut h = Harness::new();
    let workflow = h
        .scheduler
        .create_workflow(WorkflowSpec::new("deploy").with_error_strategy(ErrorStrategy::FailFast))
        .await
        .unwrap();
    let first = member(&h.scheduler, workflow.id, 50).await;
    let running = member(&h.scheduler, workflow.id, 50).await;
    let pending = member(&h.scheduler, workflow.id, 50).await;
    h.scheduler.start_task(&first.id).await.unwrap();
    h.scheduler.start_task(&running.id).await.unwrap();
    h.drain();

    h.scheduler.fail_task(&first.id, "disk full").await.unwrap();

    let sibling = h.scheduler.get_task(&pending.id).await.unwrap();
    assert_eq!(
        sibling.status,
        TaskStatus::Failed {
            error: UPSTREAM_FAILURE.to_string()
        }
    );
    // Running siblings are left to finish on their own.
    let still_running = h.scheduler.get_task(&running.id).await.unwrap();
    assert_eq!(still_running.status, TaskStatus::Running);

    let failed: Vec<_> = h
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            HiveEvent::TaskFailed { task_id, .. } => Some(task_id),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![first.id, pending.id]);
}

#[tokio::test]
async fn test_continue_on_error_leaves_siblings() {
    let h = Harness::new();
    let workflow = h
        .scheduler
        .create_workflow(
            WorkflowSpec::new("lint").with_error_strategy(ErrorStrategy::ContinueOnError),
        )
        .await
        .unwrap();
    let first = member(&h.scheduler, workflow.id, 50).await;
    let second = member(&h.scheduler, workflow.id, 50).await;
    h.scheduler.start_task(&first.id).await.unwrap();
    h.scheduler.fail_task(&first.id, "lint errors").await.unwrap();

    assert_eq!(
        h.scheduler.get_task(&second.id).await.unwrap().status,
        TaskStatus::Pending
    );
    h.scheduler.start_task(&second.id).await.unwrap();
    h.scheduler.complete_task(&second.id, None).await.unwrap();

    let progress = h.scheduler.workflow_progress(&workflow.id).await.unwrap();
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.status, WorkflowStatus::Failed);
}

// ========== Membership and Progress Tests ==========

#[tokio::test]
async fn test_progress_moves_through_statuses() {
    let h = Harness::new();
    let a = h.scheduler.create_task(TaskSpec::new("step", "a")).await.unwrap();
    let b = h.scheduler.create_task(TaskSpec::new("step", "b")).await.unwrap();
    let workflow = h
        .scheduler
        .create_workflow(WorkflowSpec::new("build").with_task(a.id).with_task(b.id))
        .await
        .unwrap();
    assert_eq!(workflow.tasks, vec![a.id, b.id]);
    assert_eq!(
        h.scheduler.workflow_progress(&workflow.id).await.unwrap().status,
        WorkflowStatus::Pending
    );

    h.scheduler.start_task(&a.id).await.unwrap();
    let progress = h.scheduler.workflow_progress(&workflow.id).await.unwrap();
    assert_eq!(progress.status, WorkflowStatus::Running);
    assert_eq!(progress.running, 1);

    h.scheduler.complete_task(&a.id, None).await.unwrap();
    h.scheduler.start_task(&b.id).await.unwrap();
    h.scheduler.complete_task(&b.id, None).await.unwrap();
    let progress = h.scheduler.workflow_progress(&workflow.id).await.unwrap();
    assert_eq!(progress.status, WorkflowStatus::Completed);
    assert_eq!(progress.finished(), 2);
}

#[tokio::test]
async fn test_membership_frozen_once_started() {
    let h = Harness::new();
    let workflow = h.scheduler.create_workflow(WorkflowSpec::new("w")).await.unwrap();
    let first = member(&h.scheduler, workflow.id, 50).await;
    let loose = h.scheduler.create_task(TaskSpec::new("step", "loose")).await.unwrap();

    h.scheduler.attach_task(&workflow.id, &loose.id).await.unwrap();
    h.scheduler.detach_task(&workflow.id, &loose.id).await.unwrap();

    h.scheduler.start_task(&first.id).await.unwrap();
    assert!(matches!(
        h.scheduler.attach_task(&workflow.id, &loose.id).await,
        Err(Error::WorkflowStarted(_))
    ));
    assert!(matches!(
        h.scheduler
            .create_task(TaskSpec::new("step", "late").in_workflow(workflow.id))
            .await,
        Err(Error::WorkflowStarted(_))
    ));
    assert_eq!(
        h.scheduler.get_workflow(&workflow.id).await.unwrap().tasks,
        vec![first.id]
    );
}

#[tokio::test]
async fn test_task_belongs_to_one_workflow() {
    let h = Harness::new();
    let task = h.scheduler.create_task(TaskSpec::new("step", "x")).await.unwrap();
    h.scheduler
        .create_workflow(WorkflowSpec::new("first").with_task(task.id))
        .await
        .unwrap();

    assert!(matches!(
        h.scheduler
            .create_workflow(WorkflowSpec::new("second").with_task(task.id))
            .await,
        Err(Error::Validation(_))
    ));
    assert_eq!(h.scheduler.list_workflows().await.len(), 1);
}
