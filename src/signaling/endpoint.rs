//! The signaling WebSocket endpoint
//!
//! Validates the `server` selector, upgrades the connection, negotiates
//! the two unreliable data channels and drives the inbound frame loop.
//! Whatever way the session ends, the slot, the session entry and the
//! peer connection are released here.

use super::{FrameSender, PeerHandle, SignalingMessage, DEFAULT_SIGNALS_COUNT};
use crate::channel::{DataChannelSink, DataChannelSource, PacketSink};
use crate::error::RelayError;
use crate::registry::{ServerEntry, ServerStatus};
use crate::relay;
use crate::runtime::RelayRuntime;
use crate::session::ClientId;
use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitStream;
use futures::StreamExt;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Query parameters accepted on the signaling routes
#[derive(Debug, Deserialize)]
pub struct SignalingQuery {
    /// Target selector: empty for the default server, a bare port, or a
    /// verbatim `host:port`
    pub server: Option<String>,
}

/// Resolve the `server` selector against the registry.
///
/// A bare port must lie inside the probed range; anything else is taken
/// verbatim as a registry id. The resolved entry must be online.
pub fn resolve_target(
    runtime: &RelayRuntime,
    selector: Option<&str>,
) -> Result<ServerEntry, RelayError> {
    let selector = selector.filter(|s| !s.is_empty());

    let id = match selector {
        None => runtime
            .registry
            .default_server()
            .ok_or_else(|| RelayError::SelectorUnknown("no servers online".to_string()))?,
        Some(selector) => match selector.parse::<i64>() {
            Ok(port) => {
                if !runtime.config.probe.port_in_range(port) {
                    return Err(RelayError::SelectorInvalid(selector.to_string()));
                }
                format!("{}:{}", runtime.config.probe.host, port)
            }
            Err(_) => selector.to_string(),
        },
    };

    match runtime.registry.server(&id) {
        Some(entry) if entry.status == ServerStatus::Online => Ok(entry),
        _ => Err(RelayError::SelectorUnknown(id)),
    }
}

/// Axum handler for `GET /websocket` and `GET /signal`.
///
/// The selector is validated before the upgrade so a bad request is
/// answered with a plain HTTP status instead of a dead WebSocket.
pub async fn websocket_handler(
    State(runtime): State<Arc<RelayRuntime>>,
    Query(query): Query<SignalingQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let target = match resolve_target(&runtime, query.server.as_deref()) {
        Ok(target) => target,
        Err(err) => {
            debug!("Rejecting signaling request: {}", err);
            return (err.status_code(), err.to_string()).into_response();
        }
    };

    if runtime.slots.free_count() == 0 {
        let err = RelayError::CapacityExhausted;
        return (err.status_code(), err.to_string()).into_response();
    }

    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_session(socket, runtime, target)),
        None => StatusCode::UPGRADE_REQUIRED.into_response(),
    }
}

/// Drive one signaling session from upgrade to teardown.
async fn handle_session(socket: WebSocket, runtime: Arc<RelayRuntime>, target: ServerEntry) {
    let (sink, stream) = socket.split();
    let frames = FrameSender::spawn(sink);

    let pc = match runtime
        .rtc_api
        .new_peer_connection(RTCConfiguration::default())
        .await
    {
        Ok(pc) => Arc::new(pc),
        Err(err) => {
            warn!("Failed to create peer connection: {}", err);
            return;
        }
    };

    // Reserve a slot; its index becomes the privileged first byte of the
    // client id.
    let client_id = match runtime.slots.add(None) {
        Ok(slot) => {
            let mut id: ClientId = [0u8; 4];
            rand::thread_rng().fill(&mut id[..]);
            id[0] = slot;
            id
        }
        Err(err) => {
            warn!("Rejecting session: {}", err);
            let _ = pc.close().await;
            return;
        }
    };

    if let Err(err) = run_session(&runtime, &pc, &frames, stream, &target, client_id).await {
        debug!("Signaling session for {:?} ended: {:#}", client_id, err);
    }

    runtime.teardown_session(client_id);
    if let Err(err) = pc.close().await {
        debug!("Peer connection close failed: {}", err);
    }
}

fn unreliable_channel_init() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(false),
        max_retransmits: Some(0),
        ..Default::default()
    }
}

/// Negotiate channels and run the inbound frame loop until the socket
/// closes or a protocol error occurs.
async fn run_session(
    runtime: &Arc<RelayRuntime>,
    pc: &Arc<RTCPeerConnection>,
    frames: &FrameSender,
    mut stream: SplitStream<WebSocket>,
    target: &ServerEntry,
    client_id: ClientId,
) -> Result<()> {
    // Browser -> relay channel; on open it detaches into the inbound
    // forwarder.
    let read_channel = pc
        .create_data_channel("read", Some(unreliable_channel_init()))
        .await
        .context("Failed to create read channel")?;
    {
        let channel = Arc::clone(&read_channel);
        let runtime = Arc::clone(runtime);
        read_channel.on_open(Box::new(move || {
            Box::pin(async move {
                match channel.detach().await {
                    Ok(raw) => {
                        debug!("Read channel open for client {:?}", client_id);
                        let source = Arc::new(DataChannelSource::new(raw));
                        tokio::spawn(relay::inbound_loop(runtime, source, client_id));
                    }
                    Err(err) => warn!("Failed to detach read channel: {}", err),
                }
            })
        }));
    }

    // Relay -> browser channel; on open it detaches, fills the reserved
    // slot and brings up the UDP half of the session.
    let write_channel = pc
        .create_data_channel("write", Some(unreliable_channel_init()))
        .await
        .context("Failed to create write channel")?;
    {
        let channel = Arc::clone(&write_channel);
        let runtime = Arc::clone(runtime);
        let server_id = target.id.clone();
        let server_addr = target.addr();
        write_channel.on_open(Box::new(move || {
            Box::pin(async move {
                let raw = match channel.detach().await {
                    Ok(raw) => raw,
                    Err(err) => {
                        warn!("Failed to detach write channel: {}", err);
                        return;
                    }
                };
                debug!("Write channel open for client {:?}", client_id);

                let writer: Arc<dyn PacketSink> = Arc::new(DataChannelSink::new(raw));
                runtime.slots.replace(client_id[0], Arc::clone(&writer));

                let resolved = match lookup_host(&server_addr).await {
                    Ok(mut addrs) => addrs.next(),
                    Err(_) => None,
                };
                let resolved = match resolved {
                    Some(addr) => addr,
                    None => {
                        warn!("Failed to resolve game server {}", server_addr);
                        return;
                    }
                };

                let socket = match UdpSocket::bind("0.0.0.0:0").await {
                    Ok(socket) => Arc::new(socket),
                    Err(err) => {
                        warn!("Failed to bind relay socket: {}", err);
                        return;
                    }
                };

                let session =
                    runtime
                        .sessions
                        .attach(client_id, server_id, resolved, socket, writer);
                tokio::spawn(relay::outbound_loop(Arc::clone(&runtime), session));
            })
        }));
    }

    // Trickle ICE: emit server candidates as they are gathered.
    {
        let frames = frames.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let frames = frames.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        if frames.send_event("candidate", &init).is_err() {
                            debug!("Dropping candidate, signaling socket closed");
                        }
                    }
                    Err(err) => warn!("Failed to serialize candidate: {}", err),
                }
            })
        }));
    }

    // Failed tears the connection down; Closed purges it from the peer
    // list on the next resync.
    {
        let weak_pc = Arc::downgrade(pc);
        let peers = Arc::clone(&runtime.peers);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak_pc = weak_pc.clone();
            let peers = Arc::clone(&peers);
            Box::pin(async move {
                debug!("Peer connection state: {}", state);
                match state {
                    RTCPeerConnectionState::Failed => {
                        if let Some(pc) = weak_pc.upgrade() {
                            let _ = pc.close().await;
                        }
                    }
                    RTCPeerConnectionState::Closed => {
                        peers.signal_all().await;
                    }
                    _ => {}
                }
            })
        }));
    }

    runtime
        .peers
        .register(PeerHandle {
            pc: Arc::clone(pc),
            signal_tx: frames.clone(),
            signals_count: DEFAULT_SIGNALS_COUNT,
        })
        .await;
    runtime.peers.signal_all().await;

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                debug!("WebSocket read error: {}", err);
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: SignalingMessage = serde_json::from_str(&text)
            .map_err(|err| RelayError::Signaling(format!("malformed frame: {}", err)))?;

        match frame.event.as_str() {
            "candidate" => {
                let candidate: RTCIceCandidateInit = serde_json::from_value(frame.data)
                    .map_err(|err| RelayError::Signaling(format!("bad candidate: {}", err)))?;
                pc.add_ice_candidate(candidate)
                    .await
                    .context("Failed to add ICE candidate")?;
            }
            "answer" => {
                let answer: RTCSessionDescription = serde_json::from_value(frame.data)
                    .map_err(|err| RelayError::Signaling(format!("bad answer: {}", err)))?;
                pc.set_remote_description(answer)
                    .await
                    .context("Failed to set remote description")?;
                if runtime.peers.note_answer(pc).await {
                    runtime.peers.signal_all().await;
                }
            }
            other => debug!("Ignoring unknown signaling event: {}", other),
        }
    }

    Ok(())
}
