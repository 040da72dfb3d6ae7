//! Transport seam: where encoded packets leave the process.
//!
//! A [`TransportSink`] joins a channel and hands back a [`SinkHandle`] that the
//! session owns exclusively until it disconnects.

pub mod udp;

pub use udp::UdpTransport;

use crate::types::{ChannelTarget, DestinationId};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to join {channel}: {reason}")]
    Join { channel: String, reason: String },

    #[error("transport disconnected")]
    Disconnected,
}

#[async_trait]
pub trait TransportSink: Send + Sync {
    /// Connect to `channel` on behalf of `destination`.
    async fn join(
        &self,
        destination: &DestinationId,
        channel: &ChannelTarget,
    ) -> Result<Arc<dyn SinkHandle>, TransportError>;
}

/// One joined connection.
#[async_trait]
pub trait SinkHandle: Send + Sync {
    async fn set_speaking(&self, speaking: bool) -> Result<(), TransportError>;

    /// Hand one packet to the transport. May wait for queue space; callers bound it with a timeout.
    async fn send(&self, packet: Bytes) -> Result<(), TransportError>;

    /// Release the connection. Idempotent, and never blocks.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}
