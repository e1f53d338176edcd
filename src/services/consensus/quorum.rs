//! Simple-majority quorum protocol, per §4.5.

use async_trait::async_trait;

use crate::domain::error::ConsensusError;
use crate::domain::models::{ConsensusDecision, ConsensusResult, Proposal, VoteDecision};
use crate::domain::ports::agent_voter::AgentVoter;

use super::{collect_votes, timeout_result, ConsensusProtocol};

/// Broadcasts to every agent and decides by simple majority:
/// `quorum = floor(N/2) + 1` unless an explicit override is configured.
pub struct QuorumProtocol {
    timeout_ms: u64,
    quorum_size_override: Option<usize>,
}

impl QuorumProtocol {
    pub fn new(timeout_ms: u64, quorum_size_override: Option<usize>) -> Self {
        Self {
            timeout_ms,
            quorum_size_override,
        }
    }

    fn quorum_for(&self, n: usize) -> usize {
        self.quorum_size_override.unwrap_or(n / 2 + 1)
    }
}

#[async_trait]
impl ConsensusProtocol for QuorumProtocol {
    async fn propose(
        &self,
        proposal: &Proposal,
        agents: &[String],
        voter: &dyn AgentVoter,
    ) -> Result<ConsensusResult, ConsensusError> {
        let started = std::time::Instant::now();
        let quorum = self.quorum_for(agents.len());

        let votes = match tokio::time::timeout(
            std::time::Duration::from_millis(self.timeout_ms),
            collect_votes(proposal, agents, voter),
        )
        .await
        {
            Ok(votes) => votes,
            Err(_) => return Ok(timeout_result(proposal, started)),
        };

        let approve = votes.iter().filter(|v| v.decision == VoteDecision::Approve).count();
        let reject = votes.iter().filter(|v| v.decision == VoteDecision::Reject).count();
        let decision = if approve >= quorum {
            ConsensusDecision::Approved
        } else if reject >= quorum {
            ConsensusDecision::Rejected
        } else {
            ConsensusDecision::Timeout
        };

        Ok(ConsensusResult {
            proposal_id: proposal.id.clone(),
            decision,
            participation_rate: votes.len() as f64 / agents.len().max(1) as f64,
            elapsed_ms: started.elapsed().as_millis() as u64,
            votes,
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
            let decision = self.decisions.get(agent_id).copied().unwrap_or(VoteDecision::Reject);
            Vote::new(proposal.id.clone(), agent_id, decision)
        }
    }

    fn proposal() -> Proposal {
        Proposal::new("p1", ProposalKind::TaskAssignment, "x", serde_json::json!({}), chrono::Duration::seconds(5))
    }

    #[tokio::test]
    async fn explicit_quorum_size_overrides_computed_majority() {
        let voter = ScriptedVoter {
            decisions: HashMap::from([("a1".to_string(), VoteDecision::Approve)]),
        };
        let protocol = QuorumProtocol::new(5_000, Some(1));
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];
        let result = protocol.propose(&proposal(), &agents, &voter).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
    }

    #[tokio::test]
    async fn neither_side_reaching_quorum_yields_timeout_decision() {
        let voter = ScriptedVoter {
            decisions: HashMap::from([
                ("a1".to_string(), VoteDecision::Approve),
                ("a2".to_string(), VoteDecision::Reject),
                ("a3".to_string(), VoteDecision::Abstain),
                ("a4".to_string(), VoteDecision::Abstain),
            ]),
        };
        let protocol = QuorumProtocol::new(5_000, None);
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string(), "a4".to_string()];
        let result = protocol.propose(&proposal(), &agents, &voter).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Timeout);
    }
}
