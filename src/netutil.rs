//! External address detection
//!
//! Used when the relay is started with `IP=auto`: the advertised ICE
//! candidate address is taken from the interface carrying the default
//! route, falling back to public echo services when that yields nothing
//! routable.

use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Echo services tried in order when the local probe fails
const EXTERNAL_IP_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me",
    "https://icanhazip.com",
];

/// HTTP timeout for the echo services
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Detect the address this host reaches the network with.
///
/// No packet is sent by the default-route probe; connecting a UDP socket
/// only selects the outgoing interface.
pub async fn detect_external_ip() -> Result<String> {
    if let Some(ip) = default_route_ip().await {
        return Ok(ip.to_string());
    }

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    for service in EXTERNAL_IP_SERVICES {
        let text = match client.get(*service).send().await {
            Ok(resp) => match resp.text().await {
                Ok(text) => text,
                Err(_) => continue,
            },
            Err(err) => {
                debug!("External IP service {} failed: {}", service, err);
                continue;
            }
        };

        let candidate = text.trim();
        if candidate.parse::<IpAddr>().is_ok() {
            return Ok(candidate.to_string());
        }
    }

    bail!("could not determine external IP")
}

/// Address of the interface carrying the default route, if any.
async fn default_route_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect("8.8.8.8:80").await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        return None;
    }
    Some(ip)
}
