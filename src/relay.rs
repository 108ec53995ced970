//! The per-session datapath
//!
//! Two unidirectional forwarders run per client: one pulls messages off the
//! inbound data channel and sends each as a single UDP datagram to the game
//! server, the other receives datagrams from the server and writes each as
//! a single message to the outbound channel. Each loop owns one reusable
//! buffer; there is no queueing between read and write.

use crate::channel::PacketSource;
use crate::runtime::RelayRuntime;
use crate::session::{ClientId, Session};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest message accepted from the inbound data channel
pub const MAX_INBOUND_MESSAGE: usize = 8192;

/// Largest datagram accepted from the game server
pub const MAX_UDP_DATAGRAM: usize = 2048;

/// Forward browser packets to the game server until the channel closes.
///
/// Exits on any read or send error and detaches the session, which also
/// releases the slot. Packets arriving before the session is attached are
/// dropped.
pub async fn inbound_loop(
    runtime: Arc<RelayRuntime>,
    source: Arc<dyn PacketSource>,
    client_id: ClientId,
) {
    debug!("Starting inbound forwarder for client {:?}", client_id);
    let mut buf = vec![0u8; MAX_INBOUND_MESSAGE];

    loop {
        let n = match source.recv_packet(&mut buf).await {
            Ok(0) => {
                debug!("Inbound channel closed for client {:?}", client_id);
                break;
            }
            Ok(n) => n,
            Err(err) => {
                debug!(
                    "Inbound channel error for client {:?}: {}",
                    client_id, err
                );
                break;
            }
        };

        let session = match runtime.sessions.lookup(&client_id) {
            Some(session) => session,
            // Not attached yet (or already detached): drop the packet.
            None => continue,
        };

        if let Err(err) = session.socket.send_to(&buf[..n], session.server_addr).await {
            warn!(
                "UDP send to {} failed for client {:?}: {}",
                session.server_addr, client_id, err
            );
            break;
        }

        session.touch();
        runtime.metrics.record_to_udp();
    }

    runtime.teardown_session(client_id);
    debug!("Inbound forwarder finished for client {:?}", client_id);
}

/// Forward game-server datagrams back to the browser until the socket
/// errors or the session is detached.
pub async fn outbound_loop(runtime: Arc<RelayRuntime>, session: Arc<Session>) {
    debug!(
        "Starting outbound forwarder for client {:?}",
        session.client_id
    );
    let mut buf = vec![0u8; MAX_UDP_DATAGRAM];
    let mut shutdown = session.subscribe_shutdown();

    // A detach between attach and this subscription would go unseen; the
    // lookup closes that window because detach removes the entry before
    // signaling.
    if runtime.sessions.lookup(&session.client_id).is_none() {
        debug!(
            "Session {:?} detached before the outbound forwarder started",
            session.client_id
        );
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Outbound forwarder shut down for client {:?}", session.client_id);
                break;
            }
            result = session.socket.recv_from(&mut buf) => {
                let (n, _from) = match result {
                    Ok(received) => received,
                    Err(err) => {
                        debug!(
                            "UDP recv error for client {:?}: {}",
                            session.client_id, err
                        );
                        break;
                    }
                };

                if let Err(err) = session.writer.send_packet(&buf[..n]).await {
                    debug!(
                        "Outbound channel write failed for client {:?}: {}",
                        session.client_id, err
                    );
                    break;
                }

                session.touch();
                runtime.metrics.record_from_udp();
            }
        }
    }

    debug!(
        "Outbound forwarder finished for client {:?}",
        session.client_id
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    /// Feeds scripted packets into the inbound forwarder, then errors.
    struct ScriptedSource {
        rx: Mutex<mpsc::Receiver<Vec<u8>>>,
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
    async fn test_inbound_drops_packets_without_session() {
        let runtime = RelayRuntime::new(RelayConfig::default()).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let source = Arc::new(ScriptedSource { rx: Mutex::new(rx) });

        tx.send(vec![1, 2, 3]).await.unwrap();
        drop(tx);

        inbound_loop(Arc::clone(&runtime), source, [9, 0, 0, 9]).await;
        assert_eq!(runtime.metrics.packets_to_udp(), 0);
    }
}
