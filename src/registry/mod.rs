//! Game-server discovery and liveness tracking
//!
//! A background loop sweeps the configured port range every few seconds,
//! parses whatever the servers answer with, and keeps a map of entries with
//! per-server liveness. Everything else in the process only ever sees
//! point-in-time snapshots of that map.

mod probe;

pub use probe::{parse_probe_reply, probe_server, ProbeReply, ServerInfo};

use crate::config::ProbeSettings;
use futures::future::join_all;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Game mode derived from the server's display name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Standard competitive rules
    Classic,
    /// Deathmatch variants
    Deathmatch,
    /// Gun game variants
    Gungame,
}

/// Liveness of a discovered server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Answered the most recent probe cycle
    Online,
    /// Stopped answering; kept for a grace period
    Offline,
}

fn serialize_unix_secs<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    s.serialize_u64(secs)
}

/// A discovered game server
#[derive(Debug, Clone, Serialize)]
pub struct ServerEntry {
    /// Registry key, `host:port`
    pub id: String,
    /// Probe host
    pub host: String,
    /// Game-server port
    pub port: u16,
    /// Classified game mode
    pub game_mode: GameMode,
    /// Display name from the last successful probe
    pub name: String,
    /// Current map
    pub map: String,
    /// Current player count
    pub players: u32,
    /// Server capacity
    pub max_players: u32,
    /// Liveness
    pub status: ServerStatus,
    /// Time of the last successful probe, serialized as unix seconds
    #[serde(serialize_with = "serialize_unix_secs")]
    pub last_seen: SystemTime,
    /// Round-trip time of the last successful probe in milliseconds
    pub rtt_ms: f64,
}

impl ServerEntry {
    /// Socket-address string of the game server.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Classify the game mode from a display name. Lowercased substring
/// match, first hit wins.
pub fn classify_game_mode(name: &str) -> GameMode {
    let name = name.to_lowercase();
    if name.contains("deathmatch") || name.contains("dm") {
        GameMode::Deathmatch
    } else if name.contains("gungame") || name.contains("gg") {
        GameMode::Gungame
    } else {
        GameMode::Classic
    }
}

struct RegistryInner {
    servers: HashMap<String, ServerEntry>,
    default_id: Option<String>,
}

/// Registry of discovered game servers with a background probe loop
pub struct ServerRegistry {
    settings: ProbeSettings,
    inner: Mutex<RegistryInner>,
    running: AtomicBool,
}

impl ServerRegistry {
    /// Create an empty registry. The probe loop is not started yet.
    pub fn new(settings: ProbeSettings) -> Self {
        ServerRegistry {
            settings,
            inner: Mutex::new(RegistryInner {
                servers: HashMap::new(),
                default_id: None,
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Start the background probe loop. Idempotent: a second call while
    /// the loop is running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            "Starting CS server discovery on {} (ports {}-{})",
            self.settings.host, self.settings.port_min, self.settings.port_max
        );

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while registry.running.load(Ordering::SeqCst) {
                registry.run_probe_cycle().await;
                tokio::time::sleep(registry.settings.interval).await;
            }
            debug!("Server discovery loop stopped");
        });
    }

    /// Request termination of the probe loop. A cycle already in flight
    /// may complete.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Probe every port in the range concurrently, then apply the results
    /// and drop entries that have been offline too long.
    async fn run_probe_cycle(&self) {
        let host = self.settings.host.clone();
        let timeout = self.settings.timeout;

        let probes = (self.settings.port_min..=self.settings.port_max).map(|port| {
            let host = host.clone();
            async move { (port, probe_server(&host, port, timeout).await) }
        });
        let results = join_all(probes).await;

        for (port, outcome) in results {
            match outcome {
                Some((info, rtt_ms)) => self.update_server(&host, port, info, rtt_ms),
                None => self.mark_offline(&format!("{}:{}", host, port)),
            }
        }

        self.remove_stale();
    }

    /// Record a successful probe, creating or refreshing the entry. The
    /// first server ever discovered becomes the default.
    pub fn update_server(&self, host: &str, port: u16, info: ServerInfo, rtt_ms: f64) {
        let id = format!("{}:{}", host, port);
        let game_mode = classify_game_mode(&info.name);

        let mut inner = self.inner.lock().expect("registry lock poisoned");

        let was_offline = inner
            .servers
            .get(&id)
            .map(|s| s.status == ServerStatus::Offline)
            .unwrap_or(false);
        let is_new = !inner.servers.contains_key(&id);

        inner.servers.insert(
            id.clone(),
            ServerEntry {
                id: id.clone(),
                host: host.to_string(),
                port,
                game_mode,
                name: info.name.clone(),
                map: info.map.clone(),
                players: info.players,
                max_players: info.max_players,
                status: ServerStatus::Online,
                last_seen: SystemTime::now(),
                rtt_ms,
            },
        );

        if inner.default_id.is_none() {
            info!("Set default server: {} ({})", id, info.name);
            inner.default_id = Some(id.clone());
        }

        if was_offline {
            info!("Server back online: {} ({}) on {}", id, info.name, info.map);
        } else if is_new {
            info!(
                "Discovered server: {} ({}) - {:?} on {} [{:.1}ms]",
                id, info.name, game_mode, info.map, rtt_ms
            );
        }
    }

    /// Flip an existing online entry to offline. Unknown ids are ignored;
    /// a failed probe never creates an entry.
    pub fn mark_offline(&self, id: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if let Some(server) = inner.servers.get_mut(id) {
            if server.status == ServerStatus::Online {
                server.status = ServerStatus::Offline;
                warn!("Server offline: {} ({})", id, server.name);
            }
        }
    }

    /// Drop entries that have been offline longer than the grace period,
    /// rebinding the default to any online entry if it was removed.
    fn remove_stale(&self) {
        let stale_after = self.settings.stale_after;
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        let stale: Vec<String> = inner
            .servers
            .values()
            .filter(|s| {
                s.status == ServerStatus::Offline
                    && now
                        .duration_since(s.last_seen)
                        .map(|age| age > stale_after)
                        .unwrap_or(false)
            })
            .map(|s| s.id.clone())
            .collect();

        for id in stale {
            inner.servers.remove(&id);
            info!("Removed stale server: {}", id);

            if inner.default_id.as_deref() == Some(id.as_str()) {
                let next_default = inner
                    .servers
                    .values()
                    .find(|s| s.status == ServerStatus::Online)
                    .map(|s| s.id.clone());
                inner.default_id = next_default;
            }
        }
    }

    /// Point-in-time copy of the registry.
    pub fn servers(&self) -> HashMap<String, ServerEntry> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.servers.clone()
    }

    /// Look up a single entry by id.
    pub fn server(&self, id: &str) -> Option<ServerEntry> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.servers.get(id).cloned()
    }

    /// The default server id: the configured default when it is still
    /// online, otherwise any online entry.
    pub fn default_server(&self) -> Option<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");

        if let Some(id) = &inner.default_id {
            if let Some(server) = inner.servers.get(id) {
                if server.status == ServerStatus::Online {
                    return Some(id.clone());
                }
            }
        }

        inner
            .servers
            .values()
            .find(|s| s.status == ServerStatus::Online)
            .map(|s| s.id.clone())
    }

    /// Count of online entries, for the metrics gauges.
    pub fn online_count(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .servers
            .values()
            .filter(|s| s.status == ServerStatus::Online)
            .count()
    }
}
