//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Server::stop → trigger token → accept loop exits, listener closes
//!                  → connection tasks observe child tokens and unwind
//!                  → task group drains → stop returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls Server::stop
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, return
//! - Drain, not abort: tasks unwind through the close signal

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
