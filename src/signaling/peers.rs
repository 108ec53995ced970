//! The peer-connection list and its resync routine
//!
//! Every signaling session registers here. The resync walk purges peers
//! whose connection reached `Closed` and (re-)offers to peers that still
//! owe a negotiation round, restarting from the beginning whenever it
//! mutates the list. After too many restarts it backs off and reschedules
//! itself so it cannot live-lock callers mutating the list.

use super::FrameSender;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

/// Negotiation rounds a fresh peer owes
pub const DEFAULT_SIGNALS_COUNT: i32 = 1;

/// List restarts tolerated before the walk backs off
const MAX_SYNC_ATTEMPTS: usize = 25;

/// Back-off delay before the rescheduled walk
const RESYNC_RETRY_DELAY: Duration = Duration::from_secs(3);

/// One registered signaling session
pub struct PeerHandle {
    /// The peer connection
    pub pc: Arc<RTCPeerConnection>,
    /// Frame writer of the session's WebSocket
    pub signal_tx: FrameSender,
    /// Remaining negotiation rounds; an accepted answer decrements
    pub signals_count: i32,
}

/// Process-wide list of signaling sessions behind one writer lock
pub struct PeerList {
    peers: RwLock<Vec<PeerHandle>>,
}

impl PeerList {
    /// Create an empty list.
    pub fn new() -> Self {
        PeerList {
            peers: RwLock::new(Vec::new()),
        }
    }

    /// Append a session to the list.
    pub async fn register(&self, handle: PeerHandle) {
        self.peers.write().await.push(handle);
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Record an accepted answer for `pc`. Returns whether the peer still
    /// owes a negotiation round and the caller should resync.
    pub async fn note_answer(&self, pc: &Arc<RTCPeerConnection>) -> bool {
        let mut peers = self.peers.write().await;
        for peer in peers.iter_mut() {
            if Arc::ptr_eq(&peer.pc, pc) {
                peer.signals_count -= 1;
                return peer.signals_count > 0;
            }
        }
        false
    }

    /// Walk the list: purge `Closed` peers and send offers to peers with
    /// pending negotiation rounds.
    ///
    /// The walk restarts after every list mutation or failed negotiation
    /// step; after [`MAX_SYNC_ATTEMPTS`] restarts it schedules itself to
    /// run again after [`RESYNC_RETRY_DELAY`] and returns, releasing the
    /// lock for whoever it was starving.
    pub fn signal_all(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let list = Arc::clone(self);
        Box::pin(async move {
            let mut peers = list.peers.write().await;

            for attempt in 0.. {
                if attempt == MAX_SYNC_ATTEMPTS {
                    drop(peers);
                    debug!("Peer resync hit the restart limit, backing off");
                    let list = Arc::clone(&list);
                    tokio::spawn(async move {
                        tokio::time::sleep(RESYNC_RETRY_DELAY).await;
                        list.signal_all().await;
                    });
                    return;
                }

                if !attempt_sync(&mut peers).await {
                    break;
                }
            }
        })
    }
}

/// One pass over the list. Returns `true` when the pass mutated the list
/// or failed mid-way and must be restarted.
async fn attempt_sync(peers: &mut Vec<PeerHandle>) -> bool {
    for i in 0..peers.len() {
        if peers[i].signals_count <= 0 {
            continue;
        }

        if peers[i].pc.connection_state() == RTCPeerConnectionState::Closed {
            peers.swap_remove(i);
            return true;
        }

        let offer = match peers[i].pc.create_offer(None).await {
            Ok(offer) => offer,
            Err(err) => {
                warn!("Failed to create offer: {}", err);
                return true;
            }
        };

        if let Err(err) = peers[i].pc.set_local_description(offer.clone()).await {
            warn!("Failed to set local description: {}", err);
            return true;
        }

        if peers[i].signal_tx.send_event("offer", &offer).is_err() {
            return true;
        }
    }

    false
}

impl Default for PeerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_list_resync_is_a_no_op() {
        let list = Arc::new(PeerList::new());
        list.signal_all().await;
        assert!(list.is_empty().await);
    }
}
