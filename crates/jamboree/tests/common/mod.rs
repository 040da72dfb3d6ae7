//! Shared fakes: a recording transport and synthetic PCM sources.
//!
//! Both write into one ordered [`EventLog`], so tests can assert on the
//! interleaving of joins, packets, disconnects and decoder releases.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use jamboree::{
    AudioFormat, ChannelTarget, CodecEncoderFactory, DecodeError, DestinationId, PcmSource,
    PumpSettings, RegistryOptions, SessionRegistry, SinkHandle, SourceFactory, TransportError,
    TransportSink,
};
use jamconf::Codec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Joined { sink: usize, channel: String },
    Speaking { sink: usize, on: bool },
    /// `marker` is the first sample of the frame, identifying the source that produced it.
    Packet { sink: usize, marker: i16 },
    Disconnected { sink: usize },
    SourceOpened { source: i16 },
    SourceClosed { source: i16 },
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn packets_from(&self, marker: i16) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Packet { marker: m, .. } if *m == marker))
            .count()
    }

    pub fn position(&self, wanted: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == wanted)
    }

    pub fn first_packet_from(&self, marker: i16) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, Event::Packet { marker: m, .. } if *m == marker))
    }

    pub fn last_packet_from(&self, marker: i16) -> Option<usize> {
        self.events()
            .iter()
            .rposition(|e| matches!(e, Event::Packet { marker: m, .. } if *m == marker))
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

/// In-memory transport that records everything.
#[derive(Default)]
pub struct RecordingTransport {
    pub log: EventLog,
    next_sink: AtomicUsize,
    /// Fail every join.
    pub fail_join: AtomicBool,
    /// Sinks created from now on never accept a packet.
    pub stall_sends: AtomicBool,
    sinks: Mutex<Vec<Arc<RecordingSink>>>,
}

impl RecordingTransport {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn sinks(&self) -> Vec<Arc<RecordingSink>> {
        self.sinks.lock().unwrap().clone()
    }

    pub fn connected_sinks(&self) -> usize {
        self.sinks().iter().filter(|s| s.is_connected()).count()
    }
}

#[async_trait]
impl TransportSink for RecordingTransport {
    async fn join(
        &self,
        _destination: &DestinationId,
        channel: &ChannelTarget,
    ) -> Result<Arc<dyn SinkHandle>, TransportError> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(TransportError::Join {
                channel: channel.to_string(),
                reason: "channel unavailable".to_string(),
            });
        }

        let id = self.next_sink.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(Event::Joined {
            sink: id,
            channel: channel.to_string(),
        });
        let sink = Arc::new(RecordingSink {
            id,
            log: self.log.clone(),
            connected: AtomicBool::new(true),
            stall: self.stall_sends.load(Ordering::SeqCst),
        });
        self.sinks.lock().unwrap().push(sink.clone());
        Ok(sink)
    }
}

pub struct RecordingSink {
    pub id: usize,
    log: EventLog,
    connected: AtomicBool,
    stall: bool,
}

#[async_trait]
impl SinkHandle for RecordingSink {
    async fn set_speaking(&self, speaking: bool) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.log.push(Event::Speaking {
            sink: self.id,
            on: speaking,
        });
        Ok(())
    }

    async fn send(&self, packet: Bytes) -> Result<(), TransportError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let marker = i16::from_le_bytes([packet[0], packet[1]]);
        self.log.push(Event::Packet {
            sink: self.id,
            marker,
        });
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.log.push(Event::Disconnected { sink: self.id });
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Sources whose every sample is the source's own 1-based id.
pub struct SyntheticSources {
    pub log: EventLog,
    next: AtomicUsize,
    /// Frames per source; `None` streams forever.
    pub frames: Option<usize>,
    /// Delay per frame, standing in for real-time decoding.
    pub frame_delay: Duration,
    pub fail_open: AtomicBool,
    /// How long each source takes to shut down.
    pub shutdown_delay: Duration,
    /// Sources opened from now on panic in `shutdown`.
    pub panic_on_shutdown: AtomicBool,
    pub open: Arc<AtomicUsize>,
}

impl SyntheticSources {
    pub fn new(log: EventLog, frames: Option<usize>, frame_delay: Duration) -> Self {
        Self {
            log,
            next: AtomicUsize::new(0),
            frames,
            frame_delay,
            fail_open: AtomicBool::new(false),
            shutdown_delay: Duration::ZERO,
            panic_on_shutdown: AtomicBool::new(false),
            open: Arc::default(),
        }
    }

    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    pub fn endless(log: EventLog) -> Self {
        Self::new(log, None, Duration::from_millis(1))
    }

    pub fn finite(log: EventLog, frames: usize) -> Self {
        Self::new(log, Some(frames), Duration::ZERO)
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl SourceFactory for SyntheticSources {
    fn open(&self, url: &str, _format: &AudioFormat) -> Result<Box<dyn PcmSource>, DecodeError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DecodeError::Read(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot open {}", url),
            )));
        }
        let id = (self.next.fetch_add(1, Ordering::SeqCst) + 1) as i16;
        self.log.push(Event::SourceOpened { source: id });
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSource {
            id,
            remaining: self.frames,
            delay: self.frame_delay,
            log: self.log.clone(),
            open: self.open.clone(),
            closed: false,
            shutdown_delay: self.shutdown_delay,
            panic_on_shutdown: self.panic_on_shutdown.load(Ordering::SeqCst),
        }))
    }
}

struct SyntheticSource {
    id: i16,
    remaining: Option<usize>,
    delay: Duration,
    log: EventLog,
    open: Arc<AtomicUsize>,
    closed: bool,
    shutdown_delay: Duration,
    panic_on_shutdown: bool,
}

#[async_trait]
impl PcmSource for SyntheticSource {
    async fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool, DecodeError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(false);
            }
            *remaining -= 1;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        frame.fill(self.id);
        Ok(true)
    }

    async fn shutdown(&mut self) {
        if self.panic_on_shutdown {
            panic!("source {} failed to shut down", self.id);
        }
        if !self.shutdown_delay.is_zero() {
            tokio::time::sleep(self.shutdown_delay).await;
        }
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
            self.log.push(Event::SourceClosed { source: self.id });
        }
    }
}

/// Tiny frames, no warm-up, short send timeout.
pub fn test_options() -> RegistryOptions {
    RegistryOptions {
        format: AudioFormat {
            frame_size: 4,
            ..AudioFormat::default()
        },
        pump: PumpSettings {
            send_timeout: Duration::from_millis(100),
            warmup: Duration::ZERO,
        },
        event_capacity: 256,
    }
}

pub fn registry(transport: Arc<RecordingTransport>, sources: Arc<SyntheticSources>) -> SessionRegistry {
    SessionRegistry::new(
        transport,
        sources,
        Arc::new(CodecEncoderFactory::new(Codec::Pcm)),
        test_options(),
    )
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
