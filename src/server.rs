//! Server accept loop and coordinated shutdown.
//!
//! # Responsibilities
//! - Bind the listener and run the accept loop
//! - Apply keepalive to every accepted socket, rejecting sockets that fail
//! - Construct a Connection per socket and let `on_connect` gate activation
//! - Drain every task on stop
//!
//! # State Machine
//! ```text
//! Created ──listen──▶ Listening ──stop──▶ ShuttingDown ──drained──▶ Stopped
//!    └──────────────────stop──────────────────┘
//! ```

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::net::TcpStream;

use crate::config::{KeepAliveConfig, ServerConfig};
use crate::handler::Handler;
use crate::lifecycle::Shutdown;
use crate::net::connection::Connection;
use crate::net::keepalive::{self, KeepAliveError};
use crate::net::listener::{Accept, Listener, ListenerError};
use crate::observability::metrics;
use crate::protocol::Protocol;

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed, or accept failed and the server stopped serving.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// `start`/`listen` called while already listening.
    #[error("server is already listening")]
    AlreadyStarted,
    /// `start`/`listen` called after `stop`.
    #[error("server has been stopped")]
    Stopped,
}

/// Server lifecycle states. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
}

impl ServerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Listening,
            2 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Listening => 1,
            Self::ShuttingDown => 2,
            Self::Stopped => 3,
        }
    }
}

/// Socket options applied to each accepted stream before it becomes a connection.
type SocketSetup = fn(&TcpStream, &KeepAliveConfig) -> Result<(), KeepAliveError>;

/// A TCP server framing connections with `P` and dispatching them to `H`.
///
/// Share it behind an `Arc` to call [`stop`](Self::stop) while
/// [`start`](Self::start) runs on another task.
pub struct Server<P: Protocol, H, C = ()> {
    config: ServerConfig,
    protocol: Arc<P>,
    handler: Arc<H>,
    shutdown: Shutdown,
    state: AtomicU8,
    socket_setup: SocketSetup,
    _context: PhantomData<fn() -> C>,
}

impl<P, H, C> Server<P, H, C>
where
    P: Protocol,
    H: Handler<P, C>,
    C: Send + Sync + 'static,
{
    pub fn new(config: ServerConfig, protocol: P, handler: H) -> Self {
        Self {
            config,
            protocol: Arc::new(protocol),
            handler: Arc::new(handler),
            shutdown: Shutdown::new(),
            state: AtomicU8::new(ServerState::Created.as_u8()),
            socket_setup: keepalive::configure,
            _context: PhantomData,
        }
    }

    #[cfg(test)]
    fn with_socket_setup(mut self, setup: SocketSetup) -> Self {
        self.socket_setup = setup;
        self
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Tasks still running: the accept loop, connection setup and connection tasks.
    pub fn active_tasks(&self) -> usize {
        self.shutdown.task_count()
    }

    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Bind and serve until [`stop`](Self::stop) or a fatal accept error.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Bind the configured address, moving `Created → Listening`.
    pub async fn listen(&self) -> Result<Listener, ServerError> {
        if !self.transition(ServerState::Created, ServerState::Listening) {
            return Err(match self.state() {
                ServerState::Listening => ServerError::AlreadyStarted,
                _ => ServerError::Stopped,
            });
        }

        match Listener::bind(&self.config.listener).await {
            Ok(listener) => Ok(listener),
            Err(err) => {
                self.transition(ServerState::Listening, ServerState::Created);
                Err(err.into())
            }
        }
    }

    /// Run the accept loop on `listener` inside the server's task group.
    ///
    /// Returns `Ok(())` on shutdown. An accept error is fatal: the loop stops
    /// and the error is returned without retrying.
    pub async fn serve(&self, listener: Listener) -> Result<(), ServerError> {
        self.serve_from(listener).await
    }

    pub(crate) async fn serve_from<A: Accept>(&self, acceptor: A) -> Result<(), ServerError> {
        self.shutdown
            .tracker()
            .track_future(self.accept_loop(acceptor))
            .await
    }

    async fn accept_loop<A: Accept>(&self, listener: A) -> Result<(), ServerError> {
        let local_addr = listener.local_addr();
        tracing::info!(address = %local_addr, "Server accepting connections");

        let shutdown = self.shutdown.token();
        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                // Deadline elapsed; loop around to observe shutdown.
                Ok(None) => continue,
                Ok(Some((stream, peer_addr))) => self.accept_connection(stream, peer_addr),
                Err(err) => {
                    tracing::error!(
                        address = %local_addr,
                        error = %err,
                        "Accept failed, server stopping"
                    );
                    break Err(err.into());
                }
            }
        };

        drop(listener);
        tracing::info!(address = %local_addr, "Listener closed");
        result
    }

    fn accept_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        metrics::connection_accepted();

        if let Err(err) = (self.socket_setup)(&stream, &self.config.keepalive) {
            tracing::warn!(peer_addr = %peer_addr, error = %err, "Rejecting connection");
            metrics::connection_rejected("keepalive");
            return;
        }

        let (conn, io) =
            Connection::<P, C>::new(peer_addr, &self.config.queues, self.shutdown.token());
        let protocol = Arc::clone(&self.protocol);
        let handler = Arc::clone(&self.handler);
        let tracker = self.shutdown.tracker().clone();

        self.shutdown.tracker().spawn(async move {
            let accepted = AssertUnwindSafe(handler.on_connect(&conn))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(connection_id = %conn.id(), "on_connect panicked");
                    false
                });

            if !accepted {
                tracing::debug!(
                    connection_id = %conn.id(),
                    peer_addr = %peer_addr,
                    "Connection refused by handler"
                );
                conn.refuse();
                metrics::connection_rejected("refused");
                drop(stream);
                return;
            }

            tracing::debug!(
                connection_id = %conn.id(),
                peer_addr = %peer_addr,
                "Connection activated"
            );
            conn.spawn_tasks(stream, io, protocol, handler, &tracker);
        });
    }

    /// Signal shutdown and wait until every task has exited.
    ///
    /// In-flight reads and writes unwind through the close signal. Calling
    /// `stop` again just waits for the same drain.
    pub async fn stop(&self) {
        if self.transition(ServerState::Listening, ServerState::ShuttingDown)
            || self.transition(ServerState::Created, ServerState::ShuttingDown)
        {
            tracing::info!("Server shutting down");
        }

        self.shutdown.trigger();
        self.shutdown.wait().await;

        if self.transition(ServerState::ShuttingDown, ServerState::Stopped) {
            tracing::info!("Server stopped");
        }
    }
}
