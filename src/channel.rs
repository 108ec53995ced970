//! Datagram seams between WebRTC and the relay core
//!
//! The forwarders never talk to the WebRTC stack directly; they operate on
//! two narrow traits so that tests can drive them with in-memory peers. The
//! production implementations wrap a detached data channel, which preserves
//! message boundaries in both directions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use webrtc::data::data_channel::DataChannel;

/// Write side of a per-client byte pipe.
///
/// One call sends exactly one message; the implementation must not merge
/// or split payloads.
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Send a single datagram-sized message, returning the byte count.
    async fn send_packet(&self, data: &[u8]) -> Result<usize>;
}

/// Read side of a per-client byte pipe.
///
/// One call yields exactly one message. An error or a zero-length result
/// means the pipe is closed and the caller must exit its loop.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Receive a single message into `buf`, returning the byte count.
    async fn recv_packet(&self, buf: &mut [u8]) -> Result<usize>;
}

/// Outbound writer backed by a detached WebRTC data channel
pub struct DataChannelSink {
    channel: Arc<DataChannel>,
}

impl DataChannelSink {
    /// Wrap a detached data channel.
    pub fn new(channel: Arc<DataChannel>) -> Self {
        DataChannelSink { channel }
    }
}

#[async_trait]
impl PacketSink for DataChannelSink {
    async fn send_packet(&self, data: &[u8]) -> Result<usize> {
        self.channel
            .write(&Bytes::copy_from_slice(data))
            .await
            .context("Failed to write to data channel")
    }
}

/// Inbound reader backed by a detached WebRTC data channel
pub struct DataChannelSource {
    channel: Arc<DataChannel>,
}

impl DataChannelSource {
    /// Wrap a detached data channel.
    pub fn new(channel: Arc<DataChannel>) -> Self {
        DataChannelSource { channel }
    }
}

#[async_trait]
impl PacketSource for DataChannelSource {
    async fn recv_packet(&self, buf: &mut [u8]) -> Result<usize> {
        self.channel
            .read(buf)
            .await
            .context("Failed to read from data channel")
    }
}
