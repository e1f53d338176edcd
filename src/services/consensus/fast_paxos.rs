//! Fast Paxos protocol: a fast path at a three-quarters quorum, falling
//! back to classic prepare/accept, per §4.5.

use async_trait::async_trait;

use crate::domain::error::ConsensusError;
use crate::domain::models::{ConsensusDecision, ConsensusResult, Proposal, VoteDecision};
use crate::domain::ports::agent_voter::AgentVoter;

use super::{collect_votes, timeout_result, ConsensusProtocol};

pub struct FastPaxosProtocol {
    timeout_ms: u64,
}

impl FastPaxosProtocol {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

#[async_trait]
impl ConsensusProtocol for FastPaxosProtocol {
    async fn propose(
        &self,
        proposal: &Proposal,
        agents: &[String],
        voter: &dyn AgentVoter,
    ) -> Result<ConsensusResult, ConsensusError> {
        let started = std::time::Instant::now();
        let deadline = std::time::Duration::from_millis(self.timeout_ms);
        let n = agents.len();

        // Fast path: a single broadcast round.
        let fast_votes = match tokio::time::timeout(deadline, collect_votes(proposal, agents, voter)).await {
            Ok(votes) => votes,
            Err(_) => return Ok(timeout_result(proposal, started)),
        };
        let fast_approvals = fast_votes.iter().filter(|v| v.decision == VoteDecision::Approve).count();
        let fast_quorum = (n * 3) / 4;
        if fast_approvals >= fast_quorum {
            return Ok(ConsensusResult {
                proposal_id: proposal.id.clone(),
                decision: ConsensusDecision::Approved,
                participation_rate: fast_votes.len() as f64 / n.max(1) as f64,
                elapsed_ms: started.elapsed().as_millis() as u64,
                votes: fast_votes,
            });
        }

        // Slow path: classic prepare then accept.
        let prepared = match tokio::time::timeout(deadline, collect_votes(proposal, agents, voter)).await {
            Ok(votes) => votes,
            Err(_) => return Ok(timeout_result(proposal, started)),
        };
        if prepared.is_empty() && !agents.is_empty() {
            return Ok(timeout_result(proposal, started));
        }

        let accepted = match tokio::time::timeout(deadline, collect_votes(proposal, agents, voter)).await {
            Ok(votes) => votes,
            Err(_) => return Ok(timeout_result(proposal, started)),
        };
        let accept_approvals = accepted.iter().filter(|v| v.decision == VoteDecision::Approve).count();
        let slow_quorum = n / 2 + 1;
        let decision = if accept_approvals >= slow_quorum {
            ConsensusDecision::Approved
        } else {
            ConsensusDecision::Rejected
        };

        Ok(ConsensusResult {
            proposal_id: proposal.id.clone(),
            decision,
            participation_rate: accepted.len() as f64 / n.max(1) as f64,
            elapsed_ms: started.elapsed().as_millis() as u64,
            votes: accepted,
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
        Proposal::new("p1", ProposalKind::ResourceAllocation, "x", serde_json::json!({}), chrono::Duration::seconds(5))
    }

    #[tokio::test]
    async fn fast_path_decides_immediately_at_three_quarter_quorum() {
        let protocol = FastPaxosProtocol::new(5_000);
        let agents: Vec<String> = (0..4).map(|i| format!("a{i}")).collect();
        let voter = ScriptedVoter {
            decisions: HashMap::from([("a3".to_string(), VoteDecision::Reject)]),
        };
        let result = protocol.propose(&proposal(), &agents, &voter).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
        // Only the fast-path round ran.
        assert_eq!(result.votes.len(), 4);
    }

    #[tokio::test]
    async fn falls_back_to_slow_path_below_fast_quorum() {
        let protocol = FastPaxosProtocol::new(5_000);
        let agents: Vec<String> = (0..4).map(|i| format!("a{i}")).collect();
        let voter = ScriptedVoter {
            decisions: HashMap::from([
                ("a2".to_string(), VoteDecision::Reject),
                ("a3".to_string(), VoteDecision::Reject),
            ]),
        };
        let result = protocol.propose(&proposal(), &agents, &voter).await.unwrap();
        // Fast quorum (floor(0.75*4)=3) missed with 2 approvals, slow quorum
        // (floor(4/2)+1=3) also missed on the accept round (same script).
        assert_eq!(result.decision, ConsensusDecision::Rejected);
    }
}
