//! Reusable TCP server core.
//!
//! Accepts TCP connections, frames them with a pluggable [`Protocol`], and
//! hands packets to a [`Handler`] through bounded, backpressure-aware queues.

pub mod config;
pub mod handler;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use handler::Handler;
pub use lifecycle::Shutdown;
pub use net::{ConnError, Connection, ConnectionId, ConnectionState};
pub use protocol::{Packet, Protocol, ProtocolError};
pub use server::{Server, ServerError, ServerState};
