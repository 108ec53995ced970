//! The process-wide service aggregate
//!
//! Everything that used to be a global in earlier incarnations of this
//! relay lives here, constructed once at startup and shared by `Arc`.
//! Tests build their own runtime with whatever configuration they need.

use crate::config::RelayConfig;
use crate::metrics::Metrics;
use crate::registry::ServerRegistry;
use crate::rtc;
use crate::session::{ClientId, SessionManager};
use crate::signaling::PeerList;
use crate::slots::SlotTable;
use anyhow::Result;
use std::sync::Arc;
use webrtc::api::API;

/// Shared state of one relay process
pub struct RelayRuntime {
    /// Startup configuration
    pub config: RelayConfig,
    /// Shared WebRTC API used for every peer connection
    pub rtc_api: API,
    /// Game-server discovery
    pub registry: Arc<ServerRegistry>,
    /// Active client sessions
    pub sessions: SessionManager,
    /// Slot table backing client ids
    pub slots: SlotTable,
    /// Signaling peer list
    pub peers: Arc<PeerList>,
    /// Datapath counters
    pub metrics: Metrics,
}

impl RelayRuntime {
    /// Build a runtime from the given configuration. The registry probe
    /// loop is not started; callers opt in via `runtime.registry.start()`.
    pub async fn new(config: RelayConfig) -> Result<Arc<Self>> {
        let rtc_api = rtc::build_api(&config).await?;
        let registry = Arc::new(ServerRegistry::new(config.probe.clone()));

        Ok(Arc::new(RelayRuntime {
            config,
            rtc_api,
            registry,
            sessions: SessionManager::new(),
            slots: SlotTable::new(),
            peers: Arc::new(PeerList::new()),
            metrics: Metrics::new(),
        }))
    }

    /// Release everything a session holds: its slot and its session
    /// entry. Idempotent, and the single rendezvous every teardown path
    /// funnels through.
    pub fn teardown_session(&self, client_id: ClientId) {
        self.slots.remove(client_id[0]);
        self.sessions.detach(&client_id);
    }
}
