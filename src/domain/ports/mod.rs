//! Domain ports (trait interfaces) for the swarm coordination core.

pub mod agent_voter;

pub use agent_voter::{AgentVoter, SimulatedVoter};
