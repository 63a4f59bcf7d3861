//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use phantom_tcp::config::{ListenerConfig, QueueConfig, ServerConfig};
use phantom_tcp::protocol::{DelimitedPacket, DelimitedProtocol, Protocol};
use phantom_tcp::{Connection, Handler, Server, ServerError};

pub type LineConn = Connection<DelimitedProtocol>;

/// Something a [`Recorder`] observed.
#[derive(Debug)]
pub enum Event {
    Connected(LineConn),
    Message(Bytes),
    Closed(LineConn),
}

/// Handler that reports every callback on a channel.
///
/// Payload `quit` makes `on_message` return false; payload `panic` panics.
pub struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    accept: bool,
    echo: bool,
}

impl Recorder {
    pub fn new(accept: bool, echo: bool) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, accept, echo }, rx)
    }
}

impl Handler<DelimitedProtocol> for Recorder {
    async fn on_connect(&self, conn: &LineConn) -> bool {
        let _ = self.events.send(Event::Connected(conn.clone()));
        self.accept
    }

    async fn on_message(&self, conn: &LineConn, packet: DelimitedPacket) -> bool {
        match packet.payload().as_ref() {
            b"quit" => return false,
            b"panic" => panic!("handler asked to panic"),
            _ => {}
        }
        let _ = self.events.send(Event::Message(packet.payload().clone()));
        if self.echo {
            return conn
                .async_write_packet(&packet, Duration::from_secs(1))
                .await
                .is_ok();
        }
        true
    }

    async fn on_close(&self, conn: &LineConn) {
        let _ = self.events.send(Event::Closed(conn.clone()));
    }
}

pub fn local_config(send_capacity: usize, receive_capacity: usize) -> ServerConfig {
    ServerConfig {
        listener: ListenerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            accept_deadline_ms: 50,
            ..ListenerConfig::default()
        },
        queues: QueueConfig {
            send_capacity,
            receive_capacity,
        },
        ..ServerConfig::default()
    }
}

/// A server serving on an ephemeral loopback port.
pub struct Running<P: Protocol, H> {
    pub server: Arc<Server<P, H>>,
    pub addr: SocketAddr,
    pub task: JoinHandle<Result<(), ServerError>>,
}

pub async fn start<P, H>(config: ServerConfig, protocol: P, handler: H) -> Running<P, H>
where
    P: Protocol,
    H: Handler<P>,
{
    let server = Arc::new(Server::new(config, protocol, handler));
    let listener = server.listen().await.unwrap();
    let addr = listener.local_addr();

    let task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };
    Running { server, addr, task }
}

pub async fn start_lines(
    send_capacity: usize,
    receive_capacity: usize,
    handler: Recorder,
) -> Running<DelimitedProtocol, Recorder> {
    start(
        local_config(send_capacity, receive_capacity),
        DelimitedProtocol::lines(1024),
        handler,
    )
    .await
}

/// Next event, failing the test if none arrives within two seconds.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for handler event")
        .expect("event channel closed")
}

/// Assert that no event arrives for a short while.
pub async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<Event>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(150), events.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

pub async fn expect_connected(events: &mut mpsc::UnboundedReceiver<Event>) -> LineConn {
    match next_event(events).await {
        Event::Connected(conn) => conn,
        other => panic!("expected Connected, got {other:?}"),
    }
}

pub async fn expect_message(events: &mut mpsc::UnboundedReceiver<Event>) -> Bytes {
    match next_event(events).await {
        Event::Message(payload) => payload,
        other => panic!("expected Message, got {other:?}"),
    }
}

pub async fn expect_closed(events: &mut mpsc::UnboundedReceiver<Event>) -> LineConn {
    match next_event(events).await {
        Event::Closed(conn) => conn,
        other => panic!("expected Closed, got {other:?}"),
    }
}

/// Poll until the server reports `expected` running tasks.
pub async fn wait_for_tasks<P, H>(running: &Running<P, H>, expected: usize)
where
    P: Protocol,
    H: Handler<P>,
{
    let settled = tokio::time::timeout(Duration::from_secs(2), async {
        while running.server.active_tasks() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        settled.is_ok(),
        "expected {expected} tasks, found {}",
        running.server.active_tasks()
    );
}
