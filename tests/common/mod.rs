//! Test utilities and mocks for rtcrelay
//!
//! This module provides common test helpers used across integration tests:
//! a mock CS1.6 game server, a capturing outbound writer and a runtime
//! builder.

use anyhow::Result;
use async_trait::async_trait;
use rtcrelay::channel::PacketSink;
use rtcrelay::config::RelayConfig;
use rtcrelay::registry::ServerInfo;
use rtcrelay::RelayRuntime;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// A mock CS1.6 game server on an ephemeral UDP port.
///
/// Records every received datagram and optionally answers each one with a
/// canned reply.
pub struct MockGameServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl MockGameServer {
    /// Start a mock server that only records what it receives.
    pub async fn start() -> MockGameServer {
        Self::start_with_reply(None).await
    }

    /// Start a mock server answering every datagram with `reply`.
    pub async fn start_with_reply(reply: Option<Vec<u8>>) -> MockGameServer {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = Arc::clone(&received);
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let (n, from) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(_) => break,
                };
                received_clone.lock().unwrap().push(buf[..n].to_vec());
                if let Some(reply) = &reply {
                    let _ = socket.send_to(reply, from).await;
                }
            }
        });

        MockGameServer {
            addr,
            received,
            task,
        }
    }

    /// Address of the mock server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port of the mock server.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Registry id of the mock server.
    pub fn id(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    /// Datagrams received so far.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockGameServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Outbound writer that captures every packet it is handed.
#[derive(Default)]
pub struct CaptureSink {
    packets: Mutex<Vec<Vec<u8>>>,
}

impl CaptureSink {
    /// Create an empty capture writer.
    pub fn new() -> Arc<CaptureSink> {
        Arc::new(CaptureSink::default())
    }

    /// Packets written so far.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.packets.lock().unwrap().clone()
    }
}

#[async_trait]
impl PacketSink for CaptureSink {
    async fn send_packet(&self, data: &[u8]) -> Result<usize> {
        self.packets.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }
}

/// Build a runtime with the default configuration. The probe loop is not
/// started.
pub async fn test_runtime() -> Arc<RelayRuntime> {
    RelayRuntime::new(RelayConfig::default()).await.unwrap()
}

/// Server info used when inserting mock servers into a registry.
pub fn mock_server_info(name: &str) -> ServerInfo {
    ServerInfo {
        name: name.to_string(),
        map: "de_dust2".to_string(),
        game: "cstrike".to_string(),
        players: 5,
        max_players: 16,
    }
}

/// Wait until `predicate` holds or the timeout elapses.
pub async fn wait_for<F: Fn() -> bool>(predicate: F, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    predicate()
}
