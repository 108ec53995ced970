//! WebRTC stack construction
//!
//! One `API` instance is built at startup and shared by every peer
//! connection. Data channels are detached so the forwarders work on raw
//! byte pipes, the ICE UDP mux is bound when `PORT` is set, and a
//! NAT-1-to-1 candidate address is advertised when `IP` is set.

use crate::config::{PublicIp, RelayConfig};
use crate::netutil;
use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice::udp_mux::{UDPMuxDefault, UDPMuxParams};
use webrtc::ice::udp_network::UDPNetwork;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::interceptor::registry::Registry;

/// Build the shared WebRTC API from the relay configuration.
pub async fn build_api(config: &RelayConfig) -> Result<API> {
    let mut setting_engine = SettingEngine::default();
    setting_engine.detach_data_channels();

    if let Some(port) = config.ice_udp_port {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("Failed to bind ICE UDP mux on port {}", port))?;
        info!("ICE UDP mux bound on port {}", port);
        let mux = UDPMuxDefault::new(UDPMuxParams::new(socket));
        setting_engine.set_udp_network(UDPNetwork::Muxed(mux));
    }

    if let Some(public_ip) = &config.public_ip {
        match resolve_public_ip(public_ip).await {
            Some(ip) => {
                info!("Advertising NAT-1-to-1 address {}", ip);
                setting_engine.set_nat_1to1_ips(vec![ip], RTCIceCandidateType::Host);
            }
            None => warn!("Failed to detect external IP, using host candidates"),
        }
    }

    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("Failed to register codecs")?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .context("Failed to register interceptors")?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

async fn resolve_public_ip(public_ip: &PublicIp) -> Option<String> {
    match public_ip {
        PublicIp::Literal(ip) => Some(ip.clone()),
        PublicIp::Auto => match netutil::detect_external_ip().await {
            Ok(ip) => {
                info!("Auto-detected external IP: {}", ip);
                Some(ip)
            }
            Err(err) => {
                warn!("External IP detection failed: {}", err);
                None
            }
        },
    }
}
