//! Agent identity and registration profiles.
//!
//! Agents are external worker processes. The core never talks to them
//! directly; it only knows their identity, advertised capabilities and
//! the status reported by the agent registry.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier of an external agent, as issued by the agent registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Availability reported by the agent registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered and waiting for work.
    #[default]
    Idle,
    /// Working, but still accepting new assignments.
    Active,
    /// Not accepting new assignments.
    Busy,
    /// Unreachable or shutting down.
    Offline,
}

impl AgentStatus {
    /// Whether initial placement may pick an agent in this status.
    pub fn accepts_work(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Active)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Registration profile for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    /// Tie-break weight used when scoring steal targets.
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub status: AgentStatus,
}

impl AgentProfile {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            capabilities: HashSet::new(),
            priority: 0.0,
            status: AgentStatus::Idle,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }
}
