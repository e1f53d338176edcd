//! Raft protocol: leader election plus single-entry log replication, per
//! §4.5.
//!
//! The engine runs one logical Raft node (`node_id`) that proposes entries
//! on behalf of this process; `agents` are the other members of the
//! cluster, reached through the injected
//! [`AgentVoter`](crate::domain::ports::agent_voter::AgentVoter) for both
//! `RequestVote` and `AppendEntries` acknowledgement. `tick` is the hook a
//! background loop calls at the heartbeat/election-timeout cadence so a
//! stale leader steps down and a fresh election can start even between
//! `propose` calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::error::ConsensusError;
use crate::domain::models::{ConsensusDecision, ConsensusResult, Proposal, ProposalKind, Vote, VoteDecision};
use crate::domain::ports::agent_voter::AgentVoter;

use super::{collect_votes, timeout_result, ConsensusProtocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

struct LogEntry {
    term: u64,
    proposal_id: String,
}

struct RaftState {
    current_term: u64,
    voted_for: Option<String>,
    role: RaftRole,
    leader_id: Option<String>,
    log: Vec<LogEntry>,
    commit_index: u64,
    last_applied: u64,
    last_heartbeat: DateTime<Utc>,
}

/// One node's view of a Raft cluster. `heartbeat_interval_ms`/
/// `election_timeout_ms` default to the spec's 1 s / 5 s per §4.5.
pub struct RaftProtocol {
    node_id: String,
    timeout_ms: u64,
    election_timeout_ms: i64,
    state: RwLock<RaftState>,
}

impl RaftProtocol {
    pub fn new(node_id: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            timeout_ms,
            election_timeout_ms: 5_000,
            state: RwLock::new(RaftState {
                current_term: 0,
                voted_for: None,
                role: RaftRole::Follower,
                leader_id: None,
                log: Vec::new(),
                commit_index: 0,
                last_applied: 0,
                last_heartbeat: Utc::now(),
            }),
        }
    }

    pub async fn role(&self) -> RaftRole {
        self.state.read().await.role
    }

    pub async fn current_term(&self) -> u64 {
        self.state.read().await.current_term
    }

    /// Background-loop hook: if this node is the leader, refreshes its
    /// heartbeat timestamp; otherwise, if no heartbeat has been observed
    /// within the election timeout, starts a new election.
    pub async fn tick(&self, agents: &[String], voter: &dyn AgentVoter) {
        let now = Utc::now();
        let is_leader = { self.state.read().await.role == RaftRole::Leader };
        if is_leader {
            self.state.write().await.last_heartbeat = now;
            return;
        }
        let stale = {
            let state = self.state.read().await;
            (now - state.last_heartbeat).num_milliseconds() > self.election_timeout_ms
        };
        if stale {
            self.ensure_leader(agents, voter).await;
            self.state.write().await.last_heartbeat = now;
        }
    }

    /// Run an election if this node is not already the leader. Returns
    /// whether this node holds leadership afterward.
    async fn ensure_leader(&self, agents: &[String], voter: &dyn AgentVoter) -> bool {
        {
            let state = self.state.read().await;
            if state.role == RaftRole::Leader {
                return true;
            }
        }

        let term = {
            let mut state = self.state.write().await;
            state.current_term += 1;
            state.voted_for = Some(self.node_id.clone());
            state.role = RaftRole::Candidate;
            state.current_term
        };

        let election = Proposal::new(
            format!("{}-election-term-{term}", self.node_id),
            ProposalKind::LeaderElection,
            self.node_id.clone(),
            serde_json::json!({ "term": term }),
            chrono::Duration::milliseconds(self.timeout_ms as i64),
        );
        let votes = collect_votes(&election, agents, voter).await;
        let approvals = 1 + votes.iter().filter(|v| v.decision == VoteDecision::Approve).count();
        let majority = (agents.len() + 1) / 2 + 1;

        let mut state = self.state.write().await;
        if approvals >= majority {
            state.role = RaftRole::Leader;
            state.leader_id = Some(self.node_id.clone());
            true
        } else {
            state.role = RaftRole::Follower;
            state.voted_for = None;
            false
        }
    }
}

#[async_trait]
impl ConsensusProtocol for RaftProtocol {
    async fn propose(
        &self,
        proposal: &Proposal,
        agents: &[String],
        voter: &dyn AgentVoter,
    ) -> Result<ConsensusResult, ConsensusError> {
        let started = std::time::Instant::now();
        let cluster_size = agents.len() + 1;
        let majority = cluster_size / 2 + 1;

        if !self.ensure_leader(agents, voter).await {
            return Ok(timeout_result(proposal, started));
        }

        let replication_votes = match tokio::time::timeout(
            std::time::Duration::from_millis(self.timeout_ms),
            collect_votes(proposal, agents, voter),
        )
        .await
        {
            Ok(votes) => votes,
            Err(_) => return Ok(timeout_result(proposal, started)),
        };

        let acks = 1 + replication_votes.iter().filter(|v| v.decision == VoteDecision::Approve).count();
        let decision = if acks >= majority {
            ConsensusDecision::Approved
        } else {
            ConsensusDecision::Rejected
        };

        if decision == ConsensusDecision::Approved {
            let mut state = self.state.write().await;
            let term = state.current_term;
            state.log.push(LogEntry {
                term,
                proposal_id: proposal.id.clone(),
            });
            state.commit_index += 1;
            state.last_applied = state.commit_index;
        }

        let mut votes: Vec<Vote> = Vec::with_capacity(replication_votes.len() + 1);
        votes.push(Vote::new(proposal.id.clone(), self.node_id.clone(), VoteDecision::Approve));
        votes.extend(replication_votes);

        Ok(ConsensusResult {
            proposal_id: proposal.id.clone(),
            decision,
            participation_rate: votes.len() as f64 / cluster_size as f64,
            elapsed_ms: started.elapsed().as_millis() as u64,
            votes,
        })
    }
}
