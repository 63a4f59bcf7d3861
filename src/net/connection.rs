//! Connection state machine and per-connection I/O tasks.
//!
//! # Responsibilities
//! - Track connection state (Open → Closing → Closed)
//! - Generate unique connection IDs for tracing
//! - Own the socket: the read task holds the read half, the write task the write half
//! - Bounded send/receive queues with timeout-based backpressure
//! - Idempotent close, with `on_close` fired exactly once
//!
//! # Tasks
//! ```text
//! socket ──▶ read task ──▶ receive queue ──▶ dispatch task ──▶ Handler::on_message
//!                                      └──▶ async_read_packet
//! write / async_write_packet ──▶ send queue ──▶ write task ──▶ socket
//! ```
//! Every task races the connection's close signal, which is a child of the
//! server shutdown signal. Whichever task exits first closes the connection;
//! the last one out marks it `Closed` and calls `on_close`.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use futures_util::FutureExt;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::QueueConfig;
use crate::handler::Handler;
use crate::observability::metrics;
use crate::protocol::{Packet, Protocol, ProtocolError};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Number of tasks started per activated connection.
const TASKS_PER_CONNECTION: usize = 3;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is accepting reads and writes.
    Open,
    /// Close has begun; tasks are unwinding.
    Closing,
    /// Socket released and every task has exited.
    Closed,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closing => 1,
            Self::Closed => 2,
        }
    }
}

/// Error returned by the queue operations of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnError {
    /// The connection is closing or closed.
    #[error("connection closing")]
    ConnClosing,
    /// The send queue stayed full for the whole timeout.
    #[error("write blocking")]
    WriteBlocking,
    /// The receive queue stayed empty for the whole timeout.
    #[error("read blocking")]
    ReadBlocking,
}

struct Shared<P: Protocol, C> {
    id: ConnectionId,
    peer_addr: SocketAddr,
    state: AtomicU8,
    closed: CancellationToken,
    send_tx: mpsc::Sender<Bytes>,
    receive_rx: Mutex<mpsc::Receiver<P::Packet>>,
    context: ArcSwapOption<C>,
    live_tasks: AtomicUsize,
}

/// Task-side ends of the connection queues, consumed by [`Connection::spawn_tasks`].
pub(crate) struct ConnectionIo<P: Protocol> {
    send_rx: mpsc::Receiver<Bytes>,
    receive_tx: mpsc::Sender<P::Packet>,
}

/// Handle to one accepted connection. Cloning is cheap; all clones share state.
pub struct Connection<P: Protocol, C = ()> {
    shared: Arc<Shared<P, C>>,
}

impl<P: Protocol, C> Clone for Connection<P, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Protocol, C> fmt::Debug for Connection<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("peer_addr", &self.shared.peer_addr)
            .field(
                "state",
                &ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire)),
            )
            .finish()
    }
}

impl<P: Protocol, C> Connection<P, C>
where
    C: Send + Sync + 'static,
{
    /// Create a connection whose close signal also fires on `shutdown`.
    pub(crate) fn new(
        peer_addr: SocketAddr,
        queues: &QueueConfig,
        shutdown: &CancellationToken,
    ) -> (Self, ConnectionIo<P>) {
        let (send_tx, send_rx) = mpsc::channel(queues.send_capacity);
        let (receive_tx, receive_rx) = mpsc::channel(queues.receive_capacity);

        let conn = Self {
            shared: Arc::new(Shared {
                id: ConnectionId::new(),
                peer_addr,
                state: AtomicU8::new(ConnectionState::Open.as_u8()),
                closed: shutdown.child_token(),
                send_tx,
                receive_rx: Mutex::new(receive_rx),
                context: ArcSwapOption::empty(),
                live_tasks: AtomicUsize::new(0),
            }),
        };
        (conn, ConnectionIo { send_rx, receive_tx })
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// `true` once close has begun or the server is shutting down.
    pub fn is_closed(&self) -> bool {
        self.state() != ConnectionState::Open || self.shared.closed.is_cancelled()
    }

    /// Resolves when the connection's close signal fires.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Attach caller context, replacing any previous value.
    pub fn set_context(&self, context: C) {
        self.shared.context.store(Some(Arc::new(context)));
    }

    pub fn context(&self) -> Option<Arc<C>> {
        self.shared.context.load_full()
    }

    /// Detach and return the current context.
    pub fn take_context(&self) -> Option<Arc<C>> {
        self.shared.context.swap(None)
    }

    /// Begin closing the connection. Only the first call has any effect.
    ///
    /// The tasks observe the close signal, drop their socket halves and exit;
    /// the last one marks the connection [`ConnectionState::Closed`] and
    /// invokes `on_close`.
    pub fn close(&self) {
        let moved = self.shared.state.compare_exchange(
            ConnectionState::Open.as_u8(),
            ConnectionState::Closing.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if moved.is_ok() {
            tracing::debug!(connection_id = %self.shared.id, "Connection closing");
            self.shared.closed.cancel();
        }
    }

    /// Enqueue serialized bytes without waiting.
    pub fn try_write(&self, data: impl Into<Bytes>) -> Result<(), ConnError> {
        if self.is_closed() {
            return Err(ConnError::ConnClosing);
        }
        self.shared
            .send_tx
            .try_send(data.into())
            .map_err(|err| match err {
                TrySendError::Full(_) => ConnError::WriteBlocking,
                TrySendError::Closed(_) => ConnError::ConnClosing,
            })
    }

    /// Enqueue serialized bytes for the write task.
    ///
    /// A zero `timeout` never waits. A positive one waits for capacity until
    /// the timer ([`ConnError::WriteBlocking`]) or the close signal
    /// ([`ConnError::ConnClosing`]) fires, close winning a tie.
    pub async fn write(&self, data: impl Into<Bytes>, timeout: Duration) -> Result<(), ConnError> {
        if timeout.is_zero() {
            return self.try_write(data);
        }
        if self.is_closed() {
            return Err(ConnError::ConnClosing);
        }

        let data = data.into();
        tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(ConnError::ConnClosing),
            permit = self.shared.send_tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(data);
                    Ok(())
                }
                Err(_) => Err(ConnError::ConnClosing),
            },
            _ = tokio::time::sleep(timeout) => Err(ConnError::WriteBlocking),
        }
    }

    /// Serialize `packet` and enqueue it, with the same timeout policy as [`write`](Self::write).
    pub async fn async_write_packet(
        &self,
        packet: &impl Packet,
        timeout: Duration,
    ) -> Result<(), ConnError> {
        self.write(packet.serialize(), timeout).await
    }

    /// Take the next parsed packet from the receive queue.
    ///
    /// Competes with the dispatch task for packets. A zero `timeout` never
    /// waits; a positive one fails with [`ConnError::ReadBlocking`] when it elapses.
    pub async fn async_read_packet(&self, timeout: Duration) -> Result<P::Packet, ConnError> {
        if self.is_closed() {
            return Err(ConnError::ConnClosing);
        }

        if timeout.is_zero() {
            let mut receive_rx = self
                .shared
                .receive_rx
                .try_lock()
                .map_err(|_| ConnError::ReadBlocking)?;
            return receive_rx.try_recv().map_err(|err| match err {
                TryRecvError::Empty => ConnError::ReadBlocking,
                TryRecvError::Disconnected => ConnError::ConnClosing,
            });
        }

        tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(ConnError::ConnClosing),
            next = self.next_received() => next.ok_or(ConnError::ConnClosing),
            _ = tokio::time::sleep(timeout) => Err(ConnError::ReadBlocking),
        }
    }

    async fn next_received(&self) -> Option<P::Packet> {
        self.shared.receive_rx.lock().await.recv().await
    }

    /// Mark a connection refused by `on_connect` as closed without running `on_close`.
    pub(crate) fn refuse(&self) {
        self.shared
            .state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
        self.shared.closed.cancel();
    }

    /// Split `stream` and start the read, write and dispatch tasks on `tracker`.
    pub(crate) fn spawn_tasks<H>(
        &self,
        stream: TcpStream,
        io: ConnectionIo<P>,
        protocol: Arc<P>,
        handler: Arc<H>,
        tracker: &TaskTracker,
    ) where
        H: Handler<P, C>,
    {
        let (read_half, write_half) = stream.into_split();
        let ConnectionIo {
            send_rx,
            receive_tx,
        } = io;

        self.shared
            .live_tasks
            .store(TASKS_PER_CONNECTION, Ordering::Release);
        metrics::connection_opened();

        self.spawn_task(
            tracker,
            &handler,
            "read",
            read_loop(self.clone(), BufReader::new(read_half), protocol, receive_tx),
        );
        self.spawn_task(
            tracker,
            &handler,
            "write",
            write_loop(self.clone(), write_half, send_rx),
        );
        self.spawn_task(
            tracker,
            &handler,
            "dispatch",
            dispatch_loop(self.clone(), Arc::clone(&handler)),
        );
    }

    fn spawn_task<H, F>(&self, tracker: &TaskTracker, handler: &Arc<H>, task: &'static str, body: F)
    where
        H: Handler<P, C>,
        F: Future<Output = ()> + Send + 'static,
    {
        let conn = self.clone();
        let handler = Arc::clone(handler);
        tracker.spawn(async move {
            if let Err(panic) = AssertUnwindSafe(body).catch_unwind().await {
                tracing::error!(
                    connection_id = %conn.id(),
                    task,
                    panic = panic_message(&*panic),
                    "Connection task panicked"
                );
            }
            conn.close();
            conn.task_exited(handler.as_ref()).await;
        });
    }

    async fn task_exited<H>(&self, handler: &H)
    where
        H: Handler<P, C>,
    {
        if self.shared.live_tasks.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        self.shared
            .state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
        metrics::connection_closed();
        tracing::debug!(connection_id = %self.shared.id, "Connection closed");

        if let Err(panic) = AssertUnwindSafe(handler.on_close(self)).catch_unwind().await {
            tracing::error!(
                connection_id = %self.shared.id,
                panic = panic_message(&*panic),
                "on_close panicked"
            );
        }
    }
}

async fn read_loop<P, C>(
    conn: Connection<P, C>,
    mut reader: BufReader<OwnedReadHalf>,
    protocol: Arc<P>,
    receive_tx: mpsc::Sender<P::Packet>,
) where
    P: Protocol,
{
    let closed = conn.shared.closed.clone();
    loop {
        let packet = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            result = protocol.read_packet(&mut reader) => match result {
                Ok(packet) => packet,
                Err(ProtocolError::Closed) => {
                    tracing::debug!(connection_id = %conn.shared.id, "Peer closed connection");
                    break;
                }
                Err(err) => {
                    tracing::debug!(connection_id = %conn.shared.id, error = %err, "Read failed");
                    break;
                }
            },
        };

        tracing::trace!(connection_id = %conn.shared.id, "Packet received");
        metrics::packet_received();

        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            sent = receive_tx.send(packet) => if sent.is_err() {
                break;
            },
        }
    }
}

async fn write_loop<P, C>(
    conn: Connection<P, C>,
    mut writer: OwnedWriteHalf,
    mut send_rx: mpsc::Receiver<Bytes>,
) where
    P: Protocol,
{
    let closed = conn.shared.closed.clone();
    loop {
        let data = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = send_rx.recv() => match next {
                Some(data) => data,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            written = writer.write_all(&data) => written,
        };
        if let Err(err) = written {
            tracing::debug!(connection_id = %conn.shared.id, error = %err, "Write failed");
            break;
        }

        tracing::trace!(connection_id = %conn.shared.id, bytes = data.len(), "Packet sent");
        metrics::packet_sent();
    }
}

async fn dispatch_loop<P, C, H>(conn: Connection<P, C>, handler: Arc<H>)
where
    P: Protocol,
    C: Send + Sync + 'static,
    H: Handler<P, C>,
{
    let closed = conn.shared.closed.clone();
    loop {
        let packet = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = conn.next_received() => match next {
                Some(packet) => packet,
                None => break,
            },
        };

        if !handler.on_message(&conn, packet).await {
            tracing::debug!(connection_id = %conn.shared.id, "Handler rejected message");
            break;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
