pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod util;
pub mod workflow;

// Background actors driving the orchestration layer
pub mod actors;

pub use error::{Error, Result};
pub use orchestration::Hive;
