//! Consensus Engine: protocol-agnostic proposal/vote/decision machine with
//! pluggable protocols, per §4.5.
//!
//! The engine is generic over a [`ConsensusProtocol`] implementation
//! ([`ConsensusEngine<P>`]); the four concrete protocols named in the spec
//! (quorum, Raft, PBFT, fast-Paxos) live as tagged variants of
//! [`AnyProtocol`] rather than trait objects, per the re-architected
//! "dynamic dispatch over multiple implementations" design note — each
//! variant is a small state machine behind the same `propose` entry point.
//! Grounded in the PBFT three-phase-commit shape of the pack's
//! `synapsed-swarm::consensus` reference file, adapted to this crate's
//! `tokio::sync::RwLock` lock discipline instead of that file's `DashMap`
//! style, and to vote collection via the injected
//! [`AgentVoter`](crate::domain::ports::agent_voter::AgentVoter) port instead
//! of a live message bus.

mod fast_paxos;
mod pbft;
mod quorum;
mod raft;

pub use fast_paxos::FastPaxosProtocol;
pub use pbft::PbftProtocol;
pub use quorum::QuorumProtocol;
pub use raft::{RaftProtocol, RaftRole};

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;

use crate::domain::error::ConsensusError;
use crate::domain::models::{ConsensusConfig, ConsensusDecision, ConsensusProtocolKind, ConsensusResult, Proposal, Vote};
use crate::domain::ports::agent_voter::AgentVoter;

/// One consensus algorithm's `propose(proposal) -> ConsensusResult` entry
/// point, per §4.5. Implementations broadcast to `agents` through `voter`
/// and must return within their own internally-enforced deadline; the
/// engine additionally tracks the elapsed wall-clock time for metrics.
#[async_trait]
pub trait ConsensusProtocol: Send + Sync {
    async fn propose(
        &self,
        proposal: &Proposal,
        agents: &[String],
        voter: &dyn AgentVoter,
    ) -> Result<ConsensusResult, ConsensusError>;
}

/// Request a vote from every agent in `agents` concurrently.
pub(crate) async fn collect_votes(proposal: &Proposal, agents: &[String], voter: &dyn AgentVoter) -> Vec<Vote> {
    join_all(agents.iter().map(|agent_id| voter.request_vote(agent_id, proposal))).await
}

/// A round that neither approved nor rejected within its deadline.
pub(crate) fn timeout_result(proposal: &Proposal, started: std::time::Instant) -> ConsensusResult {
    ConsensusResult {
        proposal_id: proposal.id.clone(),
        decision: ConsensusDecision::Timeout,
        votes: Vec::new(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        participation_rate: 0.0,
    }
}

/// Tagged-variant dispatch across the four protocols named in §4.5,
/// selected from [`ConsensusConfig::protocol`].
pub enum AnyProtocol {
    Quorum(QuorumProtocol),
    Raft(RaftProtocol),
    Pbft(PbftProtocol),
    FastPaxos(FastPaxosProtocol),
}

impl AnyProtocol {
    pub fn from_config(config: &ConsensusConfig, node_id: impl Into<String>) -> Self {
        match config.protocol {
            ConsensusProtocolKind::Quorum => Self::Quorum(QuorumProtocol::new(config.timeout_ms, config.quorum_size)),
            ConsensusProtocolKind::Raft => Self::Raft(RaftProtocol::new(node_id, config.timeout_ms)),
            ConsensusProtocolKind::Pbft => Self::Pbft(PbftProtocol::new(config.timeout_ms, config.byzantine_tolerance)),
            ConsensusProtocolKind::FastPaxos => Self::FastPaxos(FastPaxosProtocol::new(config.timeout_ms)),
        }
    }

    /// Drive time-based protocol maintenance. Only Raft has a timer-driven
    /// heartbeat/election cycle; the other three protocols are purely
    /// request-driven and treat this as a no-op.
    pub async fn tick(&self, agents: &[String], voter: &dyn AgentVoter) {
        if let Self::Raft(p) = self {
            p.tick(agents, voter).await;
        }
    }
}

#[async_trait]
impl ConsensusProtocol for AnyProtocol {
    async fn propose(
        &self,
        proposal: &Proposal,
        agents: &[String],
        voter: &dyn AgentVoter,
    ) -> Result<ConsensusResult, ConsensusError> {
        match self {
            Self::Quorum(p) => p.propose(proposal, agents, voter).await,
            Self::Raft(p) => p.propose(proposal, agents, voter).await,
            Self::Pbft(p) => p.propose(proposal, agents, voter).await,
            Self::FastPaxos(p) => p.propose(proposal, agents, voter).await,
        }
    }
}

const SAMPLE_WINDOW: usize = 1000;

fn push_capped<T>(buf: &mut VecDeque<T>, value: T) {
    if buf.len() == SAMPLE_WINDOW {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn average_u64(buf: &VecDeque<u64>) -> f64 {
    if buf.is_empty() {
        return 0.0;
    }
    buf.iter().sum::<u64>() as f64 / buf.len() as f64
}

fn average_f64(buf: &VecDeque<f64>) -> f64 {
    if buf.is_empty() {
        return 0.0;
    }
    buf.iter().sum::<f64>() / buf.len() as f64
}

/// Rolling-window consensus metrics per §4.9, independent of which
/// [`ConsensusProtocol`] is plugged in.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConsensusMetricsSnapshot {
    pub total_proposals: u64,
    pub approved: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub proposals_failed: u64,
    pub avg_consensus_time_ms: f64,
    pub avg_participation_rate: f64,
}

struct MetricsState {
    total_proposals: u64,
    approved: u64,
    rejected: u64,
    timed_out: u64,
    proposals_failed: u64,
    consensus_time_samples_ms: VecDeque<u64>,
    participation_samples: VecDeque<f64>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self {
            total_proposals: 0,
            approved: 0,
            rejected: 0,
            timed_out: 0,
            proposals_failed: 0,
            consensus_time_samples_ms: VecDeque::with_capacity(SAMPLE_WINDOW),
            participation_samples: VecDeque::with_capacity(SAMPLE_WINDOW),
        }
    }
}

/// Consensus engine generic over a protocol implementation; wraps
/// `P::propose` with the rolling-window metrics (`totalProposals`,
/// `approved`, `rejected`, `timedOut`, `avgConsensusTime` over the last
/// 1000 samples, `avgParticipationRate`) named in §4.9.
pub struct ConsensusEngine<P: ConsensusProtocol> {
    protocol: P,
    voter: std::sync::Arc<dyn AgentVoter>,
    metrics: RwLock<MetricsState>,
}

impl<P: ConsensusProtocol> ConsensusEngine<P> {
    pub fn new(protocol: P, voter: std::sync::Arc<dyn AgentVoter>) -> Self {
        Self {
            protocol,
            voter,
            metrics: RwLock::new(MetricsState::default()),
        }
    }

    /// Submit `proposal` for a decision among `agents`. Per §7's failure
    /// semantics, an `Err` (e.g. [`ConsensusError::InsufficientCapacity`])
    /// counts toward `proposalsFailed` rather than `rejected`/`timedOut`.
    pub async fn propose(&self, proposal: &Proposal, agents: &[String]) -> Result<ConsensusResult, ConsensusError> {
        let started = std::time::Instant::now();
        let result = self.protocol.propose(proposal, agents, self.voter.as_ref()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut metrics = self.metrics.write().await;
        metrics.total_proposals += 1;
        match &result {
            Ok(r) => {
                match r.decision {
                    ConsensusDecision::Approved => metrics.approved += 1,
                    ConsensusDecision::Rejected => metrics.rejected += 1,
                    ConsensusDecision::Timeout => metrics.timed_out += 1,
                }
                push_capped(&mut metrics.consensus_time_samples_ms, elapsed_ms);
                push_capped(&mut metrics.participation_samples, r.participation_rate);
            }
            Err(_) => {
                metrics.proposals_failed += 1;
            }
        }
        result
    }

    pub async fn metrics_snapshot(&self) -> ConsensusMetricsSnapshot {
        let metrics = self.metrics.read().await;
        ConsensusMetricsSnapshot {
            total_proposals: metrics.total_proposals,
            approved: metrics.approved,
            rejected: metrics.rejected,
            timed_out: metrics.timed_out,
            proposals_failed: metrics.proposals_failed,
            avg_consensus_time_ms: average_u64(&metrics.consensus_time_samples_ms),
            avg_participation_rate: average_f64(&metrics.participation_samples),
        }
    }
}

impl ConsensusEngine<AnyProtocol> {
    /// Passthrough for [`AnyProtocol::tick`], using the engine's own voter.
    /// `Core::start()` calls this on a fixed interval so a Raft deployment's
    /// leader election and heartbeat timers advance even when no proposal
    /// is in flight.
    pub async fn tick(&self, agents: &[String]) {
        self.protocol.tick(agents, self.voter.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::domain::models::{ProposalKind, VoteDecision};
    use crate::domain::ports::agent_voter::SimulatedVoter;

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

    fn proposal(id: &str) -> Proposal {
        Proposal::new(id, ProposalKind::TaskAssignment, "proposer", serde_json::json!({}), chrono::Duration::seconds(5))
    }

    #[tokio::test]
    async fn quorum_proposal_scenario_4() {
        let voter = ScriptedVoter {
            decisions: HashMap::from([
                ("a4".to_string(), VoteDecision::Reject),
                ("a5".to_string(), VoteDecision::Reject),
            ]),
        };
        let engine = ConsensusEngine::new(QuorumProtocol::new(5_000, None), Arc::new(voter));
        let agents: Vec<String> = (1..=5).map(|i| format!("a{i}")).collect();

        let result = engine.propose(&proposal("p1"), &agents).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
        assert_eq!(result.votes.len(), 5);
        assert_eq!(result.participation_rate, 1.0);
    }

    #[tokio::test]
    async fn pbft_insufficient_capacity_scenario_5() {
        let engine = ConsensusEngine::new(PbftProtocol::new(5_000, 1), Arc::new(SimulatedVoter));
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];

        let result = engine.propose(&proposal("p1"), &agents).await;
        assert!(matches!(result, Err(ConsensusError::InsufficientCapacity { required: 4, available: 3 })));

        let snapshot = engine.metrics_snapshot().await;
        assert_eq!(snapshot.proposals_failed, 1);
        assert_eq!(snapshot.total_proposals, 1);
        assert_eq!(snapshot.approved, 0);
    }

    #[tokio::test]
    async fn metrics_track_rolling_average_participation() {
        let engine = ConsensusEngine::new(QuorumProtocol::new(5_000, None), Arc::new(SimulatedVoter));
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];
        for i in 0..5 {
            engine.propose(&proposal(&format!("p{i}")), &agents).await.unwrap();
        }
        let snapshot = engine.metrics_snapshot().await;
        assert_eq!(snapshot.total_proposals, 5);
        assert_eq!(snapshot.approved, 5);
        assert_eq!(snapshot.avg_participation_rate, 1.0);
    }

    #[tokio::test]
    async fn any_protocol_dispatches_to_selected_variant() {
        let config = ConsensusConfig {
            protocol: ConsensusProtocolKind::Quorum,
            timeout_ms: 5_000,
            max_retries: 3,
            byzantine_tolerance: 1,
            quorum_size: None,
        };
        let protocol = AnyProtocol::from_config(&config, "node-1");
        let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];
        let result = protocol.propose(&proposal("p1"), &agents, &SimulatedVoter).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
    }
}
