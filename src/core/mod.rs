//! Core domain models for the task engine.
//!
//! This module contains the fundamental data structures used throughout
//! the engine: tasks, their dependencies, and the store that indexes them.

pub mod dag;
pub mod task;

pub use dag::{DependencyState, TaskStore};
pub use task::{
    Dependency, DependencyKind, StatusKind, Task, TaskId, TaskSpec, TaskStatus, DEFAULT_PRIORITY,
    MAX_PRIORITY,
};
