//! Proposal / vote / consensus-decision domain model.
//!
//! These are the atomic units the Consensus Engine operates on: a proposer
//! emits a [`Proposal`], participants cast [`Vote`]s, and the engine reports
//! a terminal [`ConsensusDecision`] wrapped in a [`ConsensusResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a proposal is asking the swarm to agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    TaskAssignment,
    LeaderElection,
    ConfigurationChange,
    ResourceAllocation,
}

impl ProposalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "task-assignment",
            Self::LeaderElection => "leader-election",
            Self::ConfigurationChange => "configuration-change",
            Self::ResourceAllocation => "resource-allocation",
        }
    }
}

impl std::fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request for swarm agreement, submitted to the Consensus Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub kind: ProposalKind,
    pub proposer_id: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl Proposal {
    pub fn new(
        id: impl Into<String>,
        kind: ProposalKind,
        proposer_id: impl Into<String>,
        data: serde_json::Value,
        timeout: chrono::Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: id.into(),
            kind,
            proposer_id: proposer_id.into(),
            data,
            created_at,
            deadline: created_at + timeout,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// A single participant's decision on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
    Abstain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: String,
    pub voter_id: String,
    pub decision: VoteDecision,
    pub timestamp: DateTime<Utc>,
}

impl Vote {
    pub fn new(proposal_id: impl Into<String>, voter_id: impl Into<String>, decision: VoteDecision) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            voter_id: voter_id.into(),
            decision,
            timestamp: Utc::now(),
        }
    }
}

/// Terminal outcome of a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusDecision {
    Approved,
    Rejected,
    Timeout,
}

impl ConsensusDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ConsensusDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full result of a consensus round, returned by `ConsensusEngine::propose`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub proposal_id: String,
    pub decision: ConsensusDecision,
    pub votes: Vec<Vote>,
    pub elapsed_ms: u64,
    pub participation_rate: f64,
}

impl ConsensusResult {
    pub fn approve_count(&self) -> usize {
        self.votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Approve)
            .count()
    }

    pub fn reject_count(&self) -> usize {
        self.votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Reject)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_expires_after_deadline() {
        let proposal = Proposal::new(
            "p1",
            ProposalKind::TaskAssignment,
            "a1",
            serde_json::json!({}),
            chrono::Duration::seconds(-1),
        );
        assert!(proposal.is_expired(Utc::now()));
    }

    #[test]
    fn consensus_result_counts_votes_by_decision() {
        let result = ConsensusResult {
            proposal_id: "p1".to_string(),
            decision: ConsensusDecision::Approved,
            votes: vec![
                Vote::new("p1", "a1", VoteDecision::Approve),
                Vote::new("p1", "a2", VoteDecision::Approve),
                Vote::new("p1", "a3", VoteDecision::Reject),
            ],
            elapsed_ms: 5,
            participation_rate: 1.0,
        };
        assert_eq!(result.approve_count(), 2);
        assert_eq!(result.reject_count(), 1);
    }
}
