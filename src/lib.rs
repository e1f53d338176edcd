//! swarm-core — the agent swarm coordination core.
//!
//! Schedules and coordinates large fleets of cooperating agents under a
//! hierarchical topology: registration and work-stealing dispatch
//! ([`services::agent_registry`], [`services::coordination_tree`],
//! [`services::load_balancer`], [`services::task_dispatcher`]),
//! fault-tolerant consensus across quorum/Raft/PBFT/fast-Paxos
//! ([`services::consensus`]), health monitoring and recovery
//! ([`services::health_monitor`]), human intervention
//! ([`services::intervention_channel`]), and room-scoped telemetry
//! ([`services::event_bus`]). [`core::Core`] wires every component together
//! for one swarm; [`transport`] exposes it over a WebSocket session protocol.

pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod services;
pub mod transport;

pub use core::Core;
pub use domain::{CoreError, CoreResult};
