//! Packet counters and Prometheus exposition
//!
//! Two atomic counters cover the whole datapath; the probe registry
//! contributes the server gauges at render time.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide relay counters
#[derive(Debug, Default)]
pub struct Metrics {
    pkt_to_udp: AtomicU64,
    pkt_from_udp: AtomicU64,
}

impl Metrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Count one packet forwarded from a data channel to UDP.
    pub fn record_to_udp(&self) {
        self.pkt_to_udp.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one packet forwarded from UDP to a data channel.
    pub fn record_from_udp(&self) {
        self.pkt_from_udp.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets forwarded browser → game server so far.
    pub fn packets_to_udp(&self) -> u64 {
        self.pkt_to_udp.load(Ordering::Relaxed)
    }

    /// Packets forwarded game server → browser so far.
    pub fn packets_from_udp(&self) -> u64 {
        self.pkt_from_udp.load(Ordering::Relaxed)
    }

    /// Render the Prometheus text exposition.
    ///
    /// The server gauges are passed in by the caller so the snapshot is
    /// taken once per request.
    pub fn render_prometheus(&self, servers_online: usize, servers_total: usize) -> String {
        format!(
            "# HELP pkt_to_udp_total DataChannel to UDP packet count\n\
             # TYPE pkt_to_udp_total counter\n\
             pkt_to_udp_total {}\n\
             # HELP pkt_from_udp_total UDP to DataChannel packet count\n\
             # TYPE pkt_from_udp_total counter\n\
             pkt_from_udp_total {}\n\
             # HELP cs_servers_online Discovered CS servers currently online\n\
             # TYPE cs_servers_online gauge\n\
             cs_servers_online {}\n\
             # HELP cs_servers_total Discovered CS servers being tracked\n\
             # TYPE cs_servers_total gauge\n\
             cs_servers_total {}\n",
            self.packets_to_udp(),
            self.packets_from_udp(),
            servers_online,
            servers_total,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.packets_to_udp(), 0);
        assert_eq!(metrics.packets_from_udp(), 0);
    }

    #[test]
    fn test_record_increments() {
        let metrics = Metrics::new();
        metrics.record_to_udp();
        metrics.record_to_udp();
        metrics.record_from_udp();
        assert_eq!(metrics.packets_to_udp(), 2);
        assert_eq!(metrics.packets_from_udp(), 1);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = Metrics::new();
        for _ in 0..42 {
            metrics.record_to_udp();
        }
        for _ in 0..24 {
            metrics.record_from_udp();
        }

        let text = metrics.render_prometheus(1, 2);
        assert!(text.contains("pkt_to_udp_total 42"));
        assert!(text.contains("pkt_from_udp_total 24"));
        assert!(text.contains("cs_servers_online 1"));
        assert!(text.contains("cs_servers_total 2"));
        assert!(text.contains("# HELP pkt_to_udp_total"));
        assert!(text.contains("# TYPE pkt_to_udp_total counter"));
        assert!(text.contains("# TYPE cs_servers_online gauge"));
    }
}
