//! Per-client session state
//!
//! A session ties a client id to its UDP socket, its outbound writer and
//! the game server it targets. `detach` is the single teardown rendezvous:
//! it removes the entry and signals the forwarders, which release the
//! socket when the last of them exits.

use crate::channel::PacketSink;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Opaque 4-byte client identifier. Byte 0 is the slot index and is the
/// only byte the relay interprets; bytes 1-3 are random.
pub type ClientId = [u8; 4];

/// State of one connected browser peer
pub struct Session {
    /// Client identifier
    pub client_id: ClientId,
    /// Registry id of the target game server
    pub server_id: String,
    /// Resolved address of the target game server
    pub server_addr: SocketAddr,
    /// UDP socket dedicated to this client
    pub socket: Arc<UdpSocket>,
    /// Outbound writer, shared with the slot table entry
    pub writer: Arc<dyn PacketSink>,
    last_activity: Mutex<Instant>,
    shutdown: broadcast::Sender<()>,
}

impl Session {
    /// Update the activity timestamp. Called for each forwarded packet.
    pub fn touch(&self) {
        *self.last_activity.lock().expect("activity lock poisoned") = Instant::now();
    }

    /// Time of the last forwarded packet (or of attach).
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().expect("activity lock poisoned")
    }

    /// Receiver resolved when the session is detached.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }
}

/// Thread-safe map of active sessions keyed by client id
pub struct SessionManager {
    sessions: Mutex<HashMap<ClientId, Arc<Session>>>,
}

impl SessionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        SessionManager {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create and store a session. The caller has already validated that
    /// the target server exists in the registry.
    pub fn attach(
        &self,
        client_id: ClientId,
        server_id: String,
        server_addr: SocketAddr,
        socket: Arc<UdpSocket>,
        writer: Arc<dyn PacketSink>,
    ) -> Arc<Session> {
        let (shutdown, _) = broadcast::channel(1);
        let session = Arc::new(Session {
            client_id,
            server_id: server_id.clone(),
            server_addr,
            socket,
            writer,
            last_activity: Mutex::new(Instant::now()),
            shutdown,
        });

        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(client_id, Arc::clone(&session));
        info!("Client connected: {:?} -> {}", client_id, server_id);
        session
    }

    /// Remove the session and signal its forwarders. Idempotent; the
    /// socket closes when the last forwarder drops its handle.
    pub fn detach(&self, client_id: &ClientId) {
        let removed = self
            .sessions
            .lock()
            .expect("session lock poisoned")
            .remove(client_id);

        if let Some(session) = removed {
            let _ = session.shutdown.send(());
            info!("Client disconnected: {:?}", client_id);
        } else {
            debug!("Detach for unknown client {:?}", client_id);
        }
    }

    /// Look up a session by client id.
    pub fn lookup(&self, client_id: &ClientId) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .get(client_id)
            .cloned()
    }

    /// Update the activity timestamp of a session, if it still exists.
    pub fn touch(&self, client_id: &ClientId) {
        if let Some(session) = self.lookup(client_id) {
            session.touch();
        }
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session lock poisoned").len()
    }

    /// Whether no session is active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
