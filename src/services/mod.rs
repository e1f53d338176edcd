//! Application services implementing the coordination core's nine
//! components (§2): each module owns one component's state and exposes the
//! operations named for it, built on the domain models in
//! [`crate::domain`].

pub mod agent_registry;
pub mod consensus;
pub mod coordination_tree;
pub mod event_bus;
pub mod health_monitor;
pub mod intervention_channel;
pub mod load_balancer;
pub mod metrics;
pub mod task_dispatcher;

pub use agent_registry::AgentRegistry;
pub use consensus::{
    AnyProtocol, ConsensusEngine, ConsensusMetricsSnapshot, ConsensusProtocol, FastPaxosProtocol,
    PbftProtocol, QuorumProtocol, RaftProtocol, RaftRole,
};
pub use coordination_tree::{CoordinationTree, PlacementResult};
pub use event_bus::{EventBus, EventBusConfig, EventCategory, EventEnvelope, EventId, SequenceNumber};
pub use health_monitor::{AlwaysRecoverExecutor, HealthMonitor, RecoveryExecutor};
pub use intervention_channel::{InterventionChannel, SendOutcome};
pub use load_balancer::{Assignment, LoadBalancer};
pub use metrics::{MetricsSnapshot, MetricsSurface};
pub use task_dispatcher::{DispatchOutcome, TaskDispatcher};
