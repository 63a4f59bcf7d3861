//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bounded accept wait)
//!     → keepalive.rs (socket options, failure rejects the socket)
//!     → connection.rs (read/write/dispatch tasks, queues, close protocol)
//!     → Hand off to the Handler
//!
//! Connection States:
//!     Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - The socket is split: one reader task, one writer task, never shared
//! - Queues are bounded; producers get `WriteBlocking` instead of unbounded growth
//! - Each connection's close signal is a child of the server shutdown signal

pub mod connection;
pub mod keepalive;
pub mod listener;

pub use connection::{ConnError, Connection, ConnectionId, ConnectionState};
pub use keepalive::KeepAliveError;
pub use listener::{Listener, ListenerError};
