//! Browser signaling over WebSocket
//!
//! Frames are UTF-8 JSON objects `{"event": ..., "data": ...}` in both
//! directions. The relay emits `offer` and `candidate`, the browser sends
//! back `answer` and `candidate`; anything else is logged and ignored.

mod endpoint;
mod peers;

pub use endpoint::{resolve_target, websocket_handler};
pub use peers::{PeerHandle, PeerList, DEFAULT_SIGNALS_COUNT};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// One signaling frame
#[derive(Debug, Serialize, Deserialize)]
pub struct SignalingMessage {
    /// Event name: `offer`, `answer` or `candidate`
    pub event: String,
    /// Event payload, opaque JSON
    pub data: serde_json::Value,
}

/// Serialized handle for writing frames to one WebSocket.
///
/// Offers, trickle candidates and callback-driven writes all funnel
/// through one channel so frame writes never interleave.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl FrameSender {
    /// Spawn the writer task over the sink half of a WebSocket.
    pub fn spawn(mut sink: SplitSink<WebSocket, Message>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            debug!("Signaling writer finished");
        });

        FrameSender { tx }
    }

    /// Serialize and enqueue one `{event, data}` frame.
    pub fn send_event<T: Serialize>(&self, event: &str, data: &T) -> anyhow::Result<()> {
        let frame = SignalingMessage {
            event: event.to_string(),
            data: serde_json::to_value(data)?,
        };
        let text = serde_json::to_string(&frame)?;
        self.tx
            .send(Message::Text(text))
            .map_err(|_| anyhow::anyhow!("signaling socket closed"))
    }
}
