//! Transport: the external WebSocket session protocol and the HTTP surface
//! (metrics snapshot, health check) observers use to reach a running
//! [`Core`](crate::core::Core), per §6.

pub mod session_server;

pub use session_server::SessionServer;
