//! # rtcrelay - WebRTC to UDP game-server relay
//!
//! rtcrelay bridges browser WebRTC data channels to legacy UDP game
//! servers on the local network. Browsers negotiate a pair of unreliable,
//! unordered data channels over a WebSocket signaling endpoint; the relay
//! gives each peer a dedicated UDP socket and shuttles packets verbatim in
//! both directions.
//!
//! ## Features
//!
//! - **Trickle ICE signaling**: SDP and candidates exchanged as
//!   `{event, data}` JSON frames over `/websocket` (or `/signal`)
//! - **Server discovery**: the local port range 27000-27030 is probed
//!   every few seconds, speaking both the Source-engine and the legacy
//!   CS1.6 query dialects
//! - **Low-latency datapath**: one reusable buffer per forwarder, one UDP
//!   datagram per data-channel message, no queueing
//! - **Status surface**: heartbeat and server listings as JSON plus a
//!   Prometheus text endpoint
//!
//! ## Architecture
//!
//! ```text
//! Browser -> DataChannel -> rtcrelay -> UDP -> CS1.6 Server
//! ```
//!
//! Each client session owns one slot (of 128), one UDP socket and two
//! forwarder tasks. The signaling WebSocket, either data channel or the
//! peer connection failing all funnel into the same teardown path.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod netutil;
pub mod registry;
pub mod relay;
pub mod rtc;
pub mod runtime;
pub mod session;
pub mod signaling;
pub mod slots;

// The types most callers need directly
pub use config::RelayConfig;
pub use error::RelayError;
pub use runtime::RelayRuntime;

/// Crate version, from the package manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "rtcrelay");
    }
}
