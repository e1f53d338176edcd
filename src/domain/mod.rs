//! Domain layer for the swarm coordination core.
//!
//! Contains the entities (`models`), the error taxonomy (`error`), and the
//! trait interfaces (`ports`) the rest of the crate is built against.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{
    ConsensusError, CoreError, CoreResult, InterventionError, PersistenceError, RegistryError,
    TransportError, TreeError,
};
