//! Workflow types for the task engine.
//!
//! A workflow groups tasks under a shared parallelism limit and
//! error-handling policy. Its progress is derived from its tasks.

mod state;
mod types;

pub use state::{WorkflowProgress, WorkflowStatus};
pub use types::{
    ErrorHandling, ErrorStrategy, ParallelismConfig, ParallelismStrategy, Workflow, WorkflowId,
    WorkflowSpec,
};
