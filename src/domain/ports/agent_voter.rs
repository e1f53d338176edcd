//! `AgentVoter` port.
//!
//! The Consensus Engine needs to collect a vote from each participating
//! agent for a given [`Proposal`](crate::domain::models::Proposal). How that
//! vote is actually obtained (RPC to the agent process, an in-process
//! callback, a message-bus round trip) is specific to the embedding
//! application, so it is injected behind this trait rather than hard-coded
//! into the engine.

use async_trait::async_trait;

use crate::domain::models::{Proposal, Vote};

/// Collects a single agent's vote on a proposal.
#[async_trait]
pub trait AgentVoter: Send + Sync {
    /// Ask `agent_id` to vote on `proposal`. Implementations should apply
    /// their own timeout; the engine additionally enforces the configured
    /// consensus timeout around the whole collection round.
    async fn request_vote(&self, agent_id: &str, proposal: &Proposal) -> Vote;
}

/// Deterministic, seed-free voter that always approves.
///
/// Ships as the crate's default so tests and early integrations have a
/// working `AgentVoter` without standing up a live agent transport; it is
/// not meant to simulate realistic agent behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedVoter;

#[async_trait]
impl AgentVoter for SimulatedVoter {
    async fn request_vote(&self, agent_id: &str, proposal: &Proposal) -> Vote {
        Vote::new(
            proposal.id.clone(),
            agent_id,
            crate::domain::models::VoteDecision::Approve,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ProposalKind;

    #[tokio::test]
    async fn simulated_voter_always_approves() {
        let voter = SimulatedVoter;
        let proposal = Proposal::new(
            "p1",
            ProposalKind::TaskAssignment,
            "a1",
            serde_json::json!({}),
            chrono::Duration::seconds(5),
        );
        let vote = voter.request_vote("a2", &proposal).await;
        assert_eq!(vote.decision, crate::domain::models::VoteDecision::Approve);
        assert_eq!(vote.voter_id, "a2");
    }
}
