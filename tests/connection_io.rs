//! Per-connection I/O through a running server.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use phantom_tcp::handler::EchoHandler;
use phantom_tcp::protocol::{DelimitedProtocol, LengthPrefixedProtocol, LengthWidth};
use phantom_tcp::{ConnError, ConnectionState};

mod common;
use common::{
    assert_quiet, expect_closed, expect_connected, expect_message, local_config, start,
    start_lines, Recorder,
};

#[tokio::test]
async fn delimiter_frames_reach_on_message() {
    let (handler, mut events) = Recorder::new(true, false);
    let running = start_lines(1, 1, handler).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    expect_connected(&mut events).await;

    client.write_all(b"hello\n").await.unwrap();
    assert_eq!(expect_message(&mut events).await.as_ref(), b"hello");

    client.write_all(b"partial").await.unwrap();
    assert_quiet(&mut events).await;

    client.write_all(b"\n").await.unwrap();
    assert_eq!(expect_message(&mut events).await.as_ref(), b"partial");

    running.server.stop().await;
}

#[tokio::test]
async fn echoed_packets_keep_order() {
    let (handler, mut events) = Recorder::new(true, true);
    let running = start_lines(4, 4, handler).await;

    let client = TcpStream::connect(running.addr).await.unwrap();
    expect_connected(&mut events).await;
    let (read_half, mut write_half) = client.into_split();

    write_half.write_all(b"m1\nm2\nm3\n").await.unwrap();

    let mut lines = BufReader::new(read_half).lines();
    for expected in ["m1", "m2", "m3"] {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, expected);
    }

    running.server.stop().await;
}

#[tokio::test]
async fn server_writes_arrive_in_fifo_order() {
    let (handler, mut events) = Recorder::new(true, false);
    let running = start_lines(8, 8, handler).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    let conn = expect_connected(&mut events).await;
    let protocol = DelimitedProtocol::lines(64);

    for payload in ["first", "second", "third"] {
        let packet = protocol.packet(payload).unwrap();
        conn.async_write_packet(&packet, Duration::from_secs(1))
            .await
            .unwrap();
    }

    let mut received = vec![0u8; b"first\nsecond\nthird\n".len()];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"first\nsecond\nthird\n");

    running.server.stop().await;
}

#[tokio::test]
async fn peer_disconnect_fires_on_close_once() {
    let (handler, mut events) = Recorder::new(true, false);
    let running = start_lines(1, 1, handler).await;

    let client = TcpStream::connect(running.addr).await.unwrap();
    let conn = expect_connected(&mut events).await;
    drop(client);

    let closed = expect_closed(&mut events).await;
    assert_eq!(closed.id(), conn.id());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_quiet(&mut events).await;

    assert_eq!(
        conn.write("late", Duration::from_millis(10)).await,
        Err(ConnError::ConnClosing)
    );

    running.server.stop().await;
}

#[tokio::test]
async fn concurrent_close_runs_once() {
    let (handler, mut events) = Recorder::new(true, false);
    let running = start_lines(1, 1, handler).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    let conn = expect_connected(&mut events).await;

    let closers: Vec<_> = (0..32)
        .map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.close() })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap();
    }

    expect_closed(&mut events).await;
    assert_quiet(&mut events).await;

    // The socket is closed from the server side.
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    running.server.stop().await;
}

#[tokio::test]
async fn handler_rejection_closes_connection() {
    let (handler, mut events) = Recorder::new(true, false);
    let running = start_lines(1, 1, handler).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    expect_connected(&mut events).await;

    client.write_all(b"quit\n").await.unwrap();
    expect_closed(&mut events).await;

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    running.server.stop().await;
}

#[tokio::test]
async fn handler_panic_is_contained() {
    let (handler, mut events) = Recorder::new(true, false);
    let running = start_lines(1, 1, handler).await;

    let mut first = TcpStream::connect(running.addr).await.unwrap();
    expect_connected(&mut events).await;
    first.write_all(b"panic\n").await.unwrap();
    expect_closed(&mut events).await;

    // The server keeps serving other connections.
    let mut second = TcpStream::connect(running.addr).await.unwrap();
    expect_connected(&mut events).await;
    second.write_all(b"still here\n").await.unwrap();
    assert_eq!(expect_message(&mut events).await.as_ref(), b"still here");

    running.server.stop().await;
    assert!(running.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn malformed_frame_closes_connection() {
    let (handler, mut events) = Recorder::new(true, false);
    let mut config = local_config(1, 1);
    config.protocol.max_frame_len = 8;
    let running = start(config, DelimitedProtocol::lines(8), handler).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    expect_connected(&mut events).await;

    client.write_all(b"this frame is far too long\n").await.unwrap();
    expect_closed(&mut events).await;

    running.server.stop().await;
}

#[tokio::test]
async fn length_prefixed_echo() {
    let config = local_config(4, 4);
    let running = start(
        config,
        LengthPrefixedProtocol::new(LengthWidth::U32, 1024),
        EchoHandler::new(Duration::from_secs(1)),
    )
    .await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    let frame = [0, 0, 0, 3, b'a', b'b', b'c', 0, 0, 0, 1, b'z'];
    client.write_all(&frame).await.unwrap();

    let mut echoed = [0u8; 12];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, frame);

    running.server.stop().await;
}
