//! Integration tests for the per-session datapath
//!
//! Exercises the two forwarders against a mock game server: byte-identical
//! delivery in both directions, counter increments, and complete cleanup
//! after concurrent sessions detach.

mod common;

use anyhow::{bail, Result};
use async_trait::async_trait;
use common::{mock_server_info, test_runtime, wait_for, CaptureSink, MockGameServer};
use rtcrelay::channel::{PacketSink, PacketSource};
use rtcrelay::relay::{inbound_loop, outbound_loop};
use rtcrelay::session::ClientId;
use rtcrelay::slots::SLOT_CAPACITY;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Feeds scripted packets into the inbound forwarder; errors out once the
/// sender is dropped, like a closing data channel.
struct ScriptedSource {
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl ScriptedSource {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Arc<ScriptedSource> {
        Arc::new(ScriptedSource { rx: Mutex::new(rx) })
    }
}

#[async_trait]
impl PacketSource for ScriptedSource {
    async fn recv_packet(&self, buf: &mut [u8]) -> Result<usize> {
        match self.rx.lock().await.recv().await {
            Some(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => bail!("channel closed"),
        }
    }
}

#[tokio::test]
async fn test_inbound_packet_reaches_game_server_verbatim() {
    let runtime = test_runtime().await;
    let server = MockGameServer::start().await;
    runtime.registry.update_server(
        "127.0.0.1",
        server.port(),
        mock_server_info("Mock CS Server"),
        5.0,
    );

    let client_id: ClientId = [192, 168, 1, 100];
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let writer = CaptureSink::new();
    runtime
        .sessions
        .attach(client_id, server.id(), server.addr(), socket, writer);

    let (tx, rx) = mpsc::channel(4);
    let forwarder = tokio::spawn(inbound_loop(
        Arc::clone(&runtime),
        ScriptedSource::new(rx),
        client_id,
    ));

    let packet = vec![0xFF, 0xFF, 0xFF, 0xFF, b'i', b'n', b'f', b'o', 0x00];
    tx.send(packet.clone()).await.unwrap();

    assert!(wait_for(|| server.received().len() == 1, Duration::from_secs(2)).await);
    assert_eq!(server.received()[0], packet);
    assert_eq!(runtime.metrics.packets_to_udp(), 1);

    // Closing the inbound channel ends the forwarder and detaches the
    // session.
    drop(tx);
    forwarder.await.unwrap();
    assert!(runtime.sessions.is_empty());
}

#[tokio::test]
async fn test_outbound_datagram_reaches_writer_verbatim() {
    let runtime = test_runtime().await;

    let client_id: ClientId = [0, 1, 2, 3];
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let relay_addr = socket.local_addr().unwrap();
    let writer = CaptureSink::new();
    let session = runtime.sessions.attach(
        client_id,
        "127.0.0.1:27015".to_string(),
        "127.0.0.1:27015".parse().unwrap(),
        socket,
        Arc::clone(&writer) as Arc<dyn PacketSink>,
    );

    let forwarder = tokio::spawn(outbound_loop(Arc::clone(&runtime), session));

    let game_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let datagram: &[u8] = b"\xff\xff\xff\xffmtest\x00";
    game_server.send_to(datagram, relay_addr).await.unwrap();

    assert!(wait_for(|| writer.packets().len() == 1, Duration::from_secs(2)).await);
    assert_eq!(writer.packets()[0], datagram);
    assert_eq!(runtime.metrics.packets_from_udp(), 1);

    // Detach signals the forwarder to exit.
    runtime.sessions.detach(&client_id);
    forwarder.await.unwrap();
}

#[tokio::test]
async fn test_concurrent_sessions_attach_send_detach() {
    let runtime = test_runtime().await;
    let server = Arc::new(MockGameServer::start().await);
    runtime.registry.update_server(
        "127.0.0.1",
        server.port(),
        mock_server_info("Mock CS Server"),
        5.0,
    );

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let runtime = Arc::clone(&runtime);
        let server = Arc::clone(&server);
        handles.push(tokio::spawn(async move {
            let slot = runtime.slots.add(None).unwrap();
            let client_id: ClientId = [slot, 168, 1, i];

            let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
            runtime.sessions.attach(
                client_id,
                server.id(),
                server.addr(),
                socket,
                CaptureSink::new(),
            );

            let session = runtime.sessions.lookup(&client_id).unwrap();
            session
                .socket
                .send_to(&[0xFF, 0xFF, 0xFF, 0xFF, i], session.server_addr)
                .await
                .unwrap();

            runtime.teardown_session(client_id);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert!(wait_for(|| server.received().len() == 10, Duration::from_secs(2)).await);
    assert!(runtime.sessions.is_empty());
    assert_eq!(runtime.slots.free_count(), SLOT_CAPACITY);
}

#[tokio::test]
async fn test_slot_and_session_presence_agree() {
    let runtime = test_runtime().await;
    let server = MockGameServer::start().await;

    let slot = runtime.slots.add(None).unwrap();
    let client_id: ClientId = [slot, 7, 7, 7];
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let writer = CaptureSink::new();
    runtime.sessions.attach(
        client_id,
        server.id(),
        server.addr(),
        socket,
        Arc::clone(&writer) as Arc<dyn PacketSink>,
    );
    runtime.slots.replace(slot, writer as Arc<dyn PacketSink>);

    assert!(runtime.sessions.lookup(&client_id).is_some());
    assert!(runtime.slots.get(slot).is_some());

    runtime.teardown_session(client_id);
    assert!(runtime.sessions.lookup(&client_id).is_none());
    assert!(runtime.slots.get(slot).is_none());
}
