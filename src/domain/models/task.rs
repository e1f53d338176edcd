//! Task domain model.
//!
//! A task is an opaque unit of work submitted to the dispatcher. The core
//! does not interpret the payload; it only tracks identity, priority,
//! optional placement hints, and retry accounting while the task is owned by
//! a queue or an agent's in-flight set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority class used by the load balancer's ordering and by consensus
/// policy (some task kinds require consensus before dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "urgent" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Weight consulted by `TaskQueue`'s priority ordering; higher dequeues
    /// first.
    pub const fn as_weight(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work submitted to the Task Dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Semantic discriminator consulted for consensus-gating policy and
    /// display; the core never interprets it beyond that.
    pub task_type: String,
    /// Opaque payload; the core carries it without inspecting its contents.
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    /// Optional hint naming a preferred agent id; the load balancer may
    /// honor it when the agent is healthy, but is not required to.
    pub target_agent_hint: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    /// Number of times this task has been re-queued after an orphaned or
    /// failed assignment.
    pub retry_count: u32,
}

impl Task {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            payload: serde_json::Value::Null,
            priority,
            target_agent_hint: None,
            submitted_at: Utc::now(),
            deadline: None,
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_target_agent_hint(mut self, agent_id: impl Into<String>) -> Self {
        self.target_agent_hint = Some(agent_id.into());
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Validate invariants expected of a task descriptor before dispatch.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("task id cannot be empty".to_string());
        }
        if self.task_type.is_empty() {
            return Err("task type cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }

    /// Bump the retry counter, as done when a task returns to a queue after
    /// an orphaned or failed assignment.
    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }
}
