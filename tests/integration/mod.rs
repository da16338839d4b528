//! Integration test suite for hive.
//!
//! These tests drive the public API the way an embedding service would:
//! tasks and workflows through the scheduler, load balancing through the
//! coordinator, and the two wired together by a running [`hive::Hive`].
//!
//! # Test Categories
//!
//! - `task_engine`: Task lifecycle, dependencies, queries and cancellation
//! - `workflows`: Parallelism limits, error strategies and progress
//! - `work_stealing`: Workload tracking, steal decisions and reconciliation
//! - `runtime`: Background actors applying steals end to end
//! - `concurrency`: Invariants under concurrent callers

mod fixtures;

mod task_engine;
mod work_stealing;
mod workflows;
