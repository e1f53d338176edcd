//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod config;
pub mod coordination_node;
pub mod intervention;
pub mod proposal;
pub mod queue;
pub mod subscription;
pub mod task;

pub use agent::{Agent, AgentHealth, MAX_AGENT_ID_LEN};
pub use config::{
    Config, ConsensusConfig, ConsensusProtocolKind, CoordinationConfig, LoadBalancingConfig,
    LoadBalancingStrategy, PersistenceConfig, TransportConfig, WorkStealingConfig,
};
pub use coordination_node::{CoordinationNode, NodeId};
pub use intervention::{
    Intervention, InterventionAction, InterventionStatus, ModificationPlan,
    DEFAULT_RELAUNCH_CEILING, MAX_MESSAGE_LEN,
};
pub use proposal::{ConsensusDecision, ConsensusResult, Proposal, ProposalKind, Vote, VoteDecision};
pub use queue::{QueueItem, TaskQueue};
pub use subscription::{Subscription, DEFAULT_RATE_LIMIT_MAX, RATE_LIMIT_WINDOW_SECS};
pub use task::{Task, TaskPriority};
