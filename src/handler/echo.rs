//! Handler that writes every packet back to its sender.

use std::time::Duration;

use super::Handler;
use crate::net::connection::{ConnError, Connection};
use crate::protocol::Protocol;

#[derive(Debug, Clone)]
pub struct EchoHandler {
    write_timeout: Duration,
}

impl EchoHandler {
    /// `write_timeout` bounds how long a reply waits for send queue capacity.
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }
}

impl<P, C> Handler<P, C> for EchoHandler
where
    P: Protocol,
    C: Send + Sync + 'static,
{
    async fn on_connect(&self, conn: &Connection<P, C>) -> bool {
        tracing::info!(
            connection_id = %conn.id(),
            peer_addr = %conn.peer_addr(),
            "Client connected"
        );
        true
    }

    async fn on_message(&self, conn: &Connection<P, C>, packet: P::Packet) -> bool {
        match conn.async_write_packet(&packet, self.write_timeout).await {
            Ok(()) => true,
            Err(ConnError::WriteBlocking) => {
                tracing::warn!(
                    connection_id = %conn.id(),
                    "Client not reading, dropping connection"
                );
                false
            }
            Err(ConnError::ConnClosing | ConnError::ReadBlocking) => false,
        }
    }

    async fn on_close(&self, conn: &Connection<P, C>) {
        tracing::info!(
            connection_id = %conn.id(),
            peer_addr = %conn.peer_addr(),
            "Client disconnected"
        );
    }
}
