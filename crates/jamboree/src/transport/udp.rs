//! Plain UDP transport.
//!
//! Each joined channel gets its own connected socket and a writer task that
//! drains a bounded packet queue at frame rate. Datagrams carry a 6-byte
//! header: big-endian u16 sequence, big-endian u32 timestamp in samples.
//!
//! Disconnecting stops the writer at once and drops whatever is still queued.
//! Turning speaking off under Opus queues the silence trailer and waits until
//! the writer has put it on the wire, so the trailer survives the disconnect
//! that follows.

use super::{SinkHandle, TransportError, TransportSink};
use crate::types::{AudioFormat, ChannelTarget, DestinationId};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use jamconf::{Codec, TransportConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

pub const HEADER_LEN: usize = 6;

/// Opus silence frame; five of them mark the end of a transmission.
pub const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];
const SILENCE_FRAMES: usize = 5;

pub struct UdpTransport {
    bind_addr: String,
    queue_depth: usize,
    frame_size: u32,
    pace: Duration,
    codec: Codec,
}

impl UdpTransport {
    pub fn new(config: &TransportConfig, format: &AudioFormat, codec: Codec) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            queue_depth: config.queue_depth.max(1),
            frame_size: format.frame_size as u32,
            pace: format.frame_duration(),
            codec,
        }
    }
}

#[async_trait]
impl TransportSink for UdpTransport {
    async fn join(
        &self,
        destination: &DestinationId,
        channel: &ChannelTarget,
    ) -> Result<Arc<dyn SinkHandle>, TransportError> {
        let join_err = |reason: String| TransportError::Join {
            channel: channel.to_string(),
            reason,
        };

        let peer = tokio::net::lookup_host(channel.as_str())
            .await
            .map_err(|e| join_err(e.to_string()))?
            .next()
            .ok_or_else(|| join_err("no address resolved".to_string()))?;

        let socket = UdpSocket::bind(&self.bind_addr)
            .await
            .map_err(|e| join_err(format!("bind {}: {}", self.bind_addr, e)))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| join_err(format!("connect {}: {}", peer, e)))?;

        let (tx, rx) = mpsc::channel(self.queue_depth);
        let closed = CancellationToken::new();
        tokio::spawn(write_loop(socket, rx, self.frame_size, self.pace, closed.clone()));

        info!(%destination, %peer, "joined UDP channel");

        Ok(Arc::new(UdpSinkHandle {
            destination: destination.clone(),
            peer,
            queue: Mutex::new(Some(tx)),
            closed,
            speaking: AtomicBool::new(false),
            codec: self.codec,
        }))
    }
}

enum Outgoing {
    Packet(Bytes),
    /// Answered once everything queued before it has been written.
    Flush(oneshot::Sender<()>),
}

struct UdpSinkHandle {
    destination: DestinationId,
    peer: SocketAddr,
    queue: Mutex<Option<mpsc::Sender<Outgoing>>>,
    /// Stops the writer task.
    closed: CancellationToken,
    speaking: AtomicBool,
    codec: Codec,
}

impl UdpSinkHandle {
    fn sender(&self) -> Option<mpsc::Sender<Outgoing>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn enqueue(tx: &mpsc::Sender<Outgoing>, item: Outgoing) -> Result<(), TransportError> {
        tx.send(item).await.map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl SinkHandle for UdpSinkHandle {
    async fn set_speaking(&self, speaking: bool) -> Result<(), TransportError> {
        let tx = self.sender().ok_or(TransportError::Disconnected)?;
        let was = self.speaking.swap(speaking, Ordering::AcqRel);
        debug!(destination = %self.destination, speaking, "speaking");

        if was && !speaking && self.codec == Codec::Opus {
            for _ in 0..SILENCE_FRAMES {
                Self::enqueue(&tx, Outgoing::Packet(Bytes::from_static(&OPUS_SILENCE))).await?;
            }
            let (done, flushed) = oneshot::channel();
            Self::enqueue(&tx, Outgoing::Flush(done)).await?;
            flushed.await.map_err(|_| TransportError::Disconnected)?;
        }
        Ok(())
    }

    async fn send(&self, packet: Bytes) -> Result<(), TransportError> {
        let tx = self.sender().ok_or(TransportError::Disconnected)?;
        Self::enqueue(&tx, Outgoing::Packet(packet)).await
    }

    fn disconnect(&self) {
        let taken = self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.closed.cancel();
        if taken.is_some() {
            info!(destination = %self.destination, peer = %self.peer, "left UDP channel");
        }
    }

    fn is_connected(&self) -> bool {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

/// Frame a packet with its sequence number and timestamp.
pub fn datagram(seq: u16, timestamp: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16(seq);
    buf.put_u32(timestamp);
    buf.put_slice(payload);
    buf.freeze()
}

/// Drain the queue onto the socket, one datagram per frame interval.
///
/// Ends as soon as `closed` fires, or once every sender is gone.
async fn write_loop(
    socket: UdpSocket,
    mut rx: mpsc::Receiver<Outgoing>,
    frame_size: u32,
    pace: Duration,
    closed: CancellationToken,
) {
    let mut interval = tokio::time::interval(pace.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut seq: u16 = 0;
    let mut timestamp: u32 = 0;
    loop {
        let packet = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            item = rx.recv() => match item {
                Some(Outgoing::Packet(packet)) => packet,
                Some(Outgoing::Flush(done)) => {
                    let _ = done.send(());
                    continue;
                }
                None => break,
            },
        };
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            _ = interval.tick() => {}
        }

        let datagram = datagram(seq, timestamp, &packet);
        if let Err(e) = socket.send(&datagram).await {
            debug!(error = %e, seq, "UDP send failed");
        } else {
            trace!(seq, timestamp, bytes = datagram.len(), "sent datagram");
        }
        seq = seq.wrapping_add(1);
        timestamp = timestamp.wrapping_add(frame_size);
    }
    debug!(sent = seq, "UDP writer stopped");
}
