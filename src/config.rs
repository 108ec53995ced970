//! Configuration for the relay
//!
//! All recognized environment variables are collected once at startup into
//! a single [`RelayConfig`] record that the rest of the process receives by
//! reference. Nothing reads the environment after startup.

use std::net::SocketAddr;
use std::time::Duration;

/// Default value of the `X-Powered-By` response header
pub const DEFAULT_X_POWERED_BY: &str = "cs16-webrtc-relay";

/// Fixed HTTP listen address
const HTTP_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default probe interval in seconds
fn default_probe_interval() -> Duration {
    Duration::from_secs(3)
}

/// Default per-query probe timeout in seconds
fn default_probe_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Default offline age after which a server entry is dropped
fn default_stale_after() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Settings for the game-server discovery loop
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Host the port range is scanned on
    pub host: String,
    /// Lowest probed port (inclusive)
    pub port_min: u16,
    /// Highest probed port (inclusive)
    pub port_max: u16,
    /// Delay between probe cycles
    pub interval: Duration,
    /// Connect/read deadline for a single query
    pub timeout: Duration,
    /// Offline age after which an entry is removed
    pub stale_after: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            host: "127.0.0.1".to_string(),
            port_min: 27000,
            port_max: 27030,
            interval: default_probe_interval(),
            timeout: default_probe_timeout(),
            stale_after: default_stale_after(),
        }
    }
}

impl ProbeSettings {
    /// Check whether a port lies inside the probed range.
    pub fn port_in_range(&self, port: i64) -> bool {
        port >= i64::from(self.port_min) && port <= i64::from(self.port_max)
    }
}

/// IP address advertised in NAT-1-to-1 ICE candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicIp {
    /// A literal address supplied by the operator
    Literal(String),
    /// Detect the external address at startup
    Auto,
}

/// Runtime configuration, built once at startup
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP listen address (fixed)
    pub http_addr: SocketAddr,
    /// Game-server discovery settings
    pub probe: ProbeSettings,
    /// Port for the ICE UDP mux, from `PORT`
    pub ice_udp_port: Option<u16>,
    /// NAT-1-to-1 candidate address, from `IP`
    pub public_ip: Option<PublicIp>,
    /// `X-Powered-By` header value, `None` when suppressed
    pub x_powered_by: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            http_addr: HTTP_LISTEN_ADDR.parse().expect("static listen address"),
            probe: ProbeSettings::default(),
            ice_udp_port: None,
            public_ip: None,
            x_powered_by: Some(DEFAULT_X_POWERED_BY.to_string()),
        }
    }
}

impl RelayConfig {
    /// Build the configuration from the process environment.
    ///
    /// Recognized variables: `PORT` (ICE UDP mux port, ignored unless it
    /// parses as an integer), `IP` (literal address or `auto`),
    /// `DISABLE_X_POWERED_BY` (`"true"` suppresses the header) and
    /// `X_POWERED_BY_VALUE` (overrides the header value).
    pub fn from_env() -> Self {
        let mut config = RelayConfig::default();

        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.ice_udp_port = Some(p),
                Err(_) => tracing::warn!("Ignoring non-numeric PORT value: {}", port),
            }
        }

        if let Ok(ip) = std::env::var("IP") {
            config.public_ip = Some(if ip == "auto" {
                PublicIp::Auto
            } else {
                PublicIp::Literal(ip)
            });
        }

        if std::env::var("DISABLE_X_POWERED_BY").as_deref() == Ok("true") {
            config.x_powered_by = None;
        } else if let Ok(value) = std::env::var("X_POWERED_BY_VALUE") {
            config.x_powered_by = Some(value);
        }

        config
    }
}
