//! TCP listener with a bounded accept wait.
//!
//! # Responsibilities
//! - Resolve the configured host for the requested address family
//! - Bind to the resolved address
//! - Accept incoming TCP connections, waking at least once per accept deadline

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpStream};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Host lookup failed or produced no address of the requested family.
    #[error("Failed to resolve {address} ({network}): {source}")]
    Resolve {
        address: String,
        network: String,
        #[source]
        source: io::Error,
    },
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    local_addr: SocketAddr,
    accept_deadline: Duration,
}

fn family_matches(network: &str, addr: &SocketAddr) -> bool {
    match network {
        "tcp4" => addr.is_ipv4(),
        "tcp6" => addr.is_ipv6(),
        _ => true,
    }
}

impl Listener {
    /// Resolve and bind the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let address = config.address();
        let resolve_error = |source: io::Error| ListenerError::Resolve {
            address: address.clone(),
            network: config.network.clone(),
            source,
        };

        let addr = lookup_host(address.as_str())
            .await
            .map_err(resolve_error)?
            .find(|addr| family_matches(&config.network, addr))
            .ok_or_else(|| {
                resolve_error(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "no address of the requested family",
                ))
            })?;

        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            network = %config.network,
            accept_deadline_ms = config.accept_deadline_ms,
            "Listener bound"
        );

        Ok(Self {
            inner,
            local_addr,
            accept_deadline: config.accept_deadline(),
        })
    }

    /// Accept a new connection, waiting at most the accept deadline.
    ///
    /// Returns `Ok(None)` when the deadline elapses with nothing to accept.
    pub async fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, ListenerError> {
        match tokio::time::timeout(self.accept_deadline, self.inner.accept()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok((stream, addr))) => {
                tracing::debug!(peer_addr = %addr, "Connection accepted");
                Ok(Some((stream, addr)))
            }
            Ok(Err(err)) => Err(ListenerError::Accept(err)),
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Source of sockets for the server accept loop.
pub(crate) trait Accept: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    /// Same contract as [`Listener::accept`].
    fn accept(
        &self,
    ) -> impl Future<Output = Result<Option<(TcpStream, SocketAddr)>, ListenerError>> + Send;
}

impl Accept for Listener {
    fn local_addr(&self) -> SocketAddr {
        Listener::local_addr(self)
    }

    fn accept(
        &self,
    ) -> impl Future<Output = Result<Option<(TcpStream, SocketAddr)>, ListenerError>> + Send {
        Listener::accept(self)
    }
}
