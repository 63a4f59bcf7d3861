//! Application callbacks.
//!
//! # Data Flow
//! ```text
//! accept → on_connect (false: socket dropped, no tasks, no on_close)
//!        → dispatch task → on_message per packet (false: connection closes)
//!        → last connection task exits → on_close (exactly once)
//! ```

use std::future::Future;

use crate::net::connection::Connection;
use crate::protocol::Protocol;

pub mod echo;

pub use echo::EchoHandler;

/// Hooks invoked by the connection core.
///
/// `C` is the type of the per-connection context slot, see
/// [`Connection::set_context`].
pub trait Handler<P: Protocol, C = ()>: Send + Sync + 'static
where
    C: Send + Sync + 'static,
{
    /// Called once per accepted socket before any task starts.
    /// Returning `false` refuses the connection.
    fn on_connect(&self, conn: &Connection<P, C>) -> impl Future<Output = bool> + Send {
        let _ = conn;
        async { true }
    }

    /// Called by the dispatch task for every packet, in arrival order.
    /// Returning `false` closes the connection.
    fn on_message(
        &self,
        conn: &Connection<P, C>,
        packet: P::Packet,
    ) -> impl Future<Output = bool> + Send;

    /// Called exactly once after the socket is released and every task has exited.
    fn on_close(&self, conn: &Connection<P, C>) -> impl Future<Output = ()> + Send {
        let _ = conn;
        async {}
    }
}
