//! Agent domain model.
//!
//! An `Agent` is one cooperating computational unit in the swarm: it has an
//! opaque identity, a type tag, a capability set, a placement level in the
//! coordination tree, a health state, and the live load accounting the load
//! balancer reads to make placement decisions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length, in bytes, allowed for an agent identifier.
pub const MAX_AGENT_ID_LEN: usize = 128;

/// Health classification of an agent as tracked by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    Healthy,
    Degraded,
    Failed,
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self::Healthy
    }
}

impl AgentHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A cooperating computational unit in the swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Opaque identifier, at most [`MAX_AGENT_ID_LEN`] bytes.
    pub id: String,
    /// Caller-defined classification, e.g. "worker", "architect".
    pub agent_type: String,
    /// Set of capability tags this agent advertises (used by the load
    /// balancer and the registry's capability lookup).
    pub capabilities: HashSet<String>,
    /// Level in the coordination tree this agent is attached to (0 = root).
    pub level: u32,
    pub health: AgentHealth,
    pub last_heartbeat: DateTime<Utc>,
    /// Number of tasks currently assigned to and not yet completed by this agent.
    pub in_flight: u32,
    /// Exponential moving average of task completion latency, in milliseconds.
    pub ema_latency_ms: f64,
}

impl Agent {
    /// Create a new, healthy agent with zero load.
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            capabilities: HashSet::new(),
            level,
            health: AgentHealth::Healthy,
            last_heartbeat: Utc::now(),
            in_flight: 0,
            ema_latency_ms: 0.0,
        }
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Validate invariants that must hold before an agent is registered.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("agent id cannot be empty".to_string());
        }
        if self.id.len() > MAX_AGENT_ID_LEN {
            return Err(format!(
                "agent id '{}' exceeds {} bytes",
                self.id, MAX_AGENT_ID_LEN
            ));
        }
        if self.agent_type.is_empty() {
            return Err("agent type cannot be empty".to_string());
        }
        Ok(())
    }

    /// Record a heartbeat, resetting the staleness clock.
    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Update the EMA latency with a freshly observed sample using
    /// `avg <- (avg + sample) / 2`, as the registry's `reportCompletion` does.
    pub fn record_latency_sample(&mut self, sample_ms: f64) {
        self.ema_latency_ms = if self.ema_latency_ms == 0.0 {
            sample_ms
        } else {
            (self.ema_latency_ms + sample_ms) / 2.0
        };
    }

    pub fn increment_in_flight(&mut self) {
        self.in_flight += 1;
    }

    pub fn decrement_in_flight(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Seconds elapsed since the last heartbeat, evaluated against `now`.
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_agent_is_healthy_and_idle() {
        let agent = Agent::new("a1", "worker", 2);
        assert_eq!(agent.health, AgentHealth::Healthy);
        assert_eq!(agent.in_flight, 0);
        assert!(agent.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_id() {
        let agent = Agent::new("", "worker", 0);
        assert!(agent.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_id() {
        let agent = Agent::new("a".repeat(MAX_AGENT_ID_LEN + 1), "worker", 0);
        assert!(agent.validate().is_err());
    }

    #[test]
    fn capability_builder_and_lookup() {
        let agent = Agent::new("a1", "worker", 0)
            .with_capability("python")
            .with_capability("rust");
        assert!(agent.has_capability("python"));
        assert!(agent.has_capability("rust"));
        assert!(!agent.has_capability("go"));
    }

    #[test]
    fn in_flight_counter_saturates_at_zero() {
        let mut agent = Agent::new("a1", "worker", 0);
        agent.decrement_in_flight();
        assert_eq!(agent.in_flight, 0);
        agent.increment_in_flight();
        agent.increment_in_flight();
        agent.decrement_in_flight();
        assert_eq!(agent.in_flight, 1);
    }

    #[test]
    fn ema_latency_converges_toward_samples() {
        let mut agent = Agent::new("a1", "worker", 0);
        agent.record_latency_sample(100.0);
        assert!((agent.ema_latency_ms - 100.0).abs() < f64::EPSILON);
        agent.record_latency_sample(200.0);
        assert!(agent.ema_latency_ms > 100.0 && agent.ema_latency_ms < 200.0);
    }

    #[test]
    fn health_as_str_round_trips() {
        for h in [AgentHealth::Healthy, AgentHealth::Degraded, AgentHealth::Failed] {
            assert_eq!(AgentHealth::parse_str(h.as_str()), Some(h));
        }
    }
}
