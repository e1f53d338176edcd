//! Error taxonomy for the swarm coordination core.
//!
//! Each component that can fail gets its own `thiserror` enum; `CoreError`
//! aggregates them behind `From` conversions so call sites downstream of
//! several components (the dispatcher, the transport layer) can propagate a
//! single error type with `?`.

use thiserror::Error;

/// Errors raised by the agent registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent id '{0}' exceeds the 128 character limit")]
    IdTooLong(String),

    #[error("invalid agent: {0}")]
    InvalidAgent(String),

    #[error("agent '{0}' already registered")]
    AlreadyExists(String),

    #[error("agent '{0}' not found")]
    NotFound(String),

    #[error("no healthy agent available for capability '{0}'")]
    NoHealthyAgent(String),
}

/// Errors raised while placing or querying the coordination tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("coordination node {0} not found")]
    NodeNotFound(u64),

    #[error("node {0} is at capacity")]
    NodeAtCapacity(u64),

    #[error("placement would exceed hierarchy depth {0}")]
    DepthExceeded(u32),
}

/// Errors raised by the consensus engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("insufficient capacity: protocol requires at least {required} agents, have {available}")]
    InsufficientCapacity { required: usize, available: usize },

    #[error("proposal {0} timed out waiting for quorum")]
    Timeout(String),

    #[error("proposal {0} was cancelled")]
    Cancelled(String),

    #[error("vote rejected: {0}")]
    Rejected(String),

    #[error("not the current leader")]
    NotLeader,
}

impl ConsensusError {
    /// Whether retrying the same proposal against the same protocol could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the caller should treat this as final (no internal retry).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::InsufficientCapacity { .. } | Self::Rejected(_))
    }
}

/// Errors raised by the intervention channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterventionError {
    #[error("intervention {0} not found")]
    NotFound(String),

    #[error("invalid intervention: {0}")]
    InvalidIntervention(String),

    #[error("relaunch ceiling reached for swarm '{swarm_id}' ({ceiling} relaunches already applied)")]
    RelaunchCeilingReached { swarm_id: String, ceiling: u32 },

    #[error("intervention {0} already applied")]
    AlreadyApplied(String),
}

/// Errors raised by the session transport (WebSocket protocol, rate limiting).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("malformed message: {0}")]
    BadRequest(String),

    #[error("origin '{0}' is not on the allow-list")]
    Forbidden(String),

    #[error("rate limit exceeded for session {0}")]
    RateLimited(String),

    #[error("session {0} not found")]
    SessionNotFound(String),
}

/// Errors raised while writing or reading the optional persisted-state
/// snapshot document (§6). Best-effort by design: a save/load failure is
/// logged and never propagated into the coordination fast paths.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write snapshot to {path}: {source}")]
    Write { path: String, #[source] source: std::io::Error },

    #[error("failed to read snapshot from {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
}

/// Top-level aggregate error for the crate's public API.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Intervention(#[from] InterventionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience result alias used throughout the crate's public surface.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_display() {
        let err = RegistryError::NotFound("a1".to_string());
        assert_eq!(err.to_string(), "agent 'a1' not found");
    }

    #[test]
    fn consensus_error_classification() {
        let timeout = ConsensusError::Timeout("p1".to_string());
        assert!(timeout.is_transient());
        assert!(!timeout.is_permanent());

        let insufficient = ConsensusError::InsufficientCapacity {
            required: 4,
            available: 3,
        };
        assert!(insufficient.is_permanent());
        assert!(!insufficient.is_transient());
    }

    #[test]
    fn core_error_from_conversions() {
        let err: CoreError = RegistryError::AlreadyExists("a1".to_string()).into();
        assert!(matches!(err, CoreError::Registry(_)));

        let err: CoreError = ConsensusError::NotLeader.into();
        assert!(matches!(err, CoreError::Consensus(_)));
    }

    #[test]
    fn intervention_relaunch_ceiling_message() {
        let err = InterventionError::RelaunchCeilingReached {
            swarm_id: "swarm-1".to_string(),
            ceiling: 10,
        };
        assert!(err.to_string().contains("10 relaunches"));
    }
}
