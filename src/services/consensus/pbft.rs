//! Byzantine-tolerant PBFT protocol: pre-prepare, prepare, commit, per §4.5.
//!
//! Grounded in the three-phase-commit shape of the pack's
//! `synapsed-swarm::consensus::PBFTConsensus`/`VotingRound`, collapsed here
//! into a single `propose` call since vote collection is delegated to the
//! injected [`AgentVoter`] rather than a live message bus the engine would
//! otherwise have to buffer pre-prepare/prepare/commit messages for.

use async_trait::async_trait;

use crate::domain::error::ConsensusError;
use crate::domain::models::{ConsensusDecision, ConsensusResult, Proposal, VoteDecision};
use crate::domain::ports::agent_voter::AgentVoter;

use super::{collect_votes, timeout_result, ConsensusProtocol};

/// Byzantine-tolerance parameter `f`; quorum is `2f+1` and at least `3f+1`
/// agents must be registered for the protocol to be executable.
pub struct PbftProtocol {
    timeout_ms: u64,
    byzantine_tolerance: usize,
}

impl PbftProtocol {
    pub fn new(timeout_ms: u64, byzantine_tolerance: usize) -> Self {
        Self {
            timeout_ms,
            byzantine_tolerance,
        }
    }

    fn quorum(&self) -> usize {
        2 * self.byzantine_tolerance + 1
    }

    fn min_agents(&self) -> usize {
        3 * self.byzantine_tolerance + 1
    }
}

#[async_trait]
impl ConsensusProtocol for PbftProtocol {
    async fn propose(
        &self,
        proposal: &Proposal,
        agents: &[String],
        voter: &dyn AgentVoter,
    ) -> Result<ConsensusResult, ConsensusError> {
        let required = self.min_agents();
        if agents.len() < required {
            return Err(ConsensusError::InsufficientCapacity {
                required,
                available: agents.len(),
            });
        }

        let started = std::time::Instant::now();
        let quorum = self.quorum();
        let deadline = std::time::Duration::from_millis(self.timeout_ms);

        // Pre-prepare is implicit: the proposal itself is the leader's
        // broadcast. Prepare phase: agents exchange prepares.
        let prepare_votes = match tokio::time::timeout(deadline, collect_votes(proposal, agents, voter)).await {
            Ok(votes) => votes,
            Err(_) => return Ok(timeout_result(proposal, started)),
        };
        let prepare_approvals = prepare_votes.iter().filter(|v| v.decision == VoteDecision::Approve).count();
        if prepare_approvals < quorum {
            return Ok(ConsensusResult {
                proposal_id: proposal.id.clone(),
                decision: ConsensusDecision::Rejected,
                participation_rate: prepare_votes.len() as f64 / agents.len() as f64,
                elapsed_ms: started.elapsed().as_millis() as u64,
                votes: prepare_votes,
            });
        }

        // Commit phase: agents exchange commits.
        let commit_votes = match tokio::time::timeout(deadline, collect_votes(proposal, agents, voter)).await {
            Ok(votes) => votes,
            Err(_) => return Ok(timeout_result(proposal, started)),
        };
        let commit_approvals = commit_votes.iter().filter(|v| v.decision == VoteDecision::Approve).count();
        let decision = if commit_approvals >= quorum {
            ConsensusDecision::Approved
        } else {
            ConsensusDecision::Rejected
        };

        Ok(ConsensusResult {
            proposal_id: proposal.id.clone(),
            decision,
            participation_rate: commit_votes.len() as f64 / agents.len() as f64,
            elapsed_ms: started.elapsed().as_millis() as u64,
            votes: commit_votes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::models::{ProposalKind, Vote};

    struct ScriptedVoter {
        decisions: HashMap<String, VoteDecision>,
    }

    #[async_trait]
    impl AgentVoter for ScriptedVoter {
        async fn request_vote(&self, agent_id: &str, proposal: &Proposal) -> Vote {
            let decision = self.decisions.get(agent_id).copied().unwrap_or(VoteDecision::Approve);
            Vote::new(proposal.id.clone(), agent_id, decision)
        }
    }

    fn proposal() -> Proposal {
        Proposal::new("p1", ProposalKind::ConfigurationChange, "x", serde_json::json!({}), chrono::Duration::seconds(5))
    }

    #[tokio::test]
    async fn enough_agents_and_unanimous_approval_commits() {
        let protocol = PbftProtocol::new(5_000, 1);
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string(), "a4".to_string()];
        let voter = ScriptedVoter { decisions: HashMap::new() };
        let result = protocol.propose(&proposal(), &agents, &voter).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
    }

    #[tokio::test]
    async fn prepare_phase_short_of_quorum_rejects_before_commit_phase() {
        let protocol = PbftProtocol::new(5_000, 1);
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string(), "a4".to_string()];
        let voter = ScriptedVoter {
            decisions: HashMap::from([
                ("a2".to_string(), VoteDecision::Reject),
                ("a3".to_string(), VoteDecision::Reject),
                ("a4".to_string(), VoteDecision::Reject),
            ]),
        };
        let result = protocol.propose(&proposal(), &agents, &voter).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Rejected);
    }

    #[tokio::test]
    async fn insufficient_agents_for_byzantine_tolerance_fails_capacity() {
        let protocol = PbftProtocol::new(5_000, 1);
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];
        let voter = ScriptedVoter { decisions: HashMap::new() };
        let result = protocol.propose(&proposal(), &agents, &voter).await;
        assert!(matches!(
            result,
            Err(ConsensusError::InsufficientCapacity { required: 4, available: 3 })
        ));
    }
}
