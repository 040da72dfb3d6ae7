//! Session registry: at most one live session per destination.
//!
//! The map sits behind a single mutex that is never held across an await.
//! Starts on one destination are serialized by a per-destination async lock.
//! A replaced session stays in the map until its pump has released its sink
//! and decoder, and only then does the next transport join run, so two pumps
//! never feed the same destination at once.

use crate::decoder::{DecodeError, SourceFactory};
use crate::encoder::{EncodeError, EncoderFactory};
use crate::session::{Pump, PumpSettings, Session, SessionError, SessionOutcome};
use crate::transport::{TransportError, TransportSink};
use crate::types::{AudioFormat, ChannelTarget, DestinationId, SessionId, SessionState, Track};
use jamconf::PlaybackConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, Instrument};

/// Start-time failures. No session is installed when these are returned.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("transport connection failed: {0}")]
    Connection(#[source] TransportError),

    #[error("decoder failed to start: {0}")]
    Decode(#[source] DecodeError),

    #[error("encoder failed to start: {0}")]
    Encode(#[source] EncodeError),
}

/// Best-effort lifecycle notifications.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started {
        destination: DestinationId,
        session_id: SessionId,
        track: Track,
    },
    Ended {
        destination: DestinationId,
        session_id: SessionId,
        outcome: SessionOutcome,
    },
}

/// What is playing on a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub track: Track,
    pub requested_by: String,
    pub channel: ChannelTarget,
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub format: AudioFormat,
    pub pump: PumpSettings,
    pub event_capacity: usize,
}

impl RegistryOptions {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            format: AudioFormat::from(config),
            pump: PumpSettings {
                send_timeout: Duration::from_millis(config.send_timeout_ms),
                warmup: Duration::from_millis(config.warmup_ms),
            },
            event_capacity: 64,
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

type StartLock = Arc<tokio::sync::Mutex<()>>;

struct RegistryInner {
    sessions: Mutex<HashMap<DestinationId, Arc<Session>>>,
    starts: Mutex<HashMap<DestinationId, StartLock>>,
    transport: Arc<dyn TransportSink>,
    sources: Arc<dyn SourceFactory>,
    encoders: Arc<dyn EncoderFactory>,
    options: RegistryOptions,
    events: broadcast::Sender<SessionEvent>,
}

impl RegistryInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<DestinationId, Arc<Session>>> {
        // Critical sections are plain map operations, so a poisoned map is still consistent.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_lock(&self, destination: &DestinationId) -> StartLock {
        let mut starts = self.starts.lock().unwrap_or_else(|e| e.into_inner());
        starts.entry(destination.clone()).or_default().clone()
    }

    /// Drop the start lock for `destination` once nobody else holds it.
    fn release_start_lock(&self, destination: &DestinationId, lock: StartLock) {
        let mut starts = self.starts.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        if starts.get(destination).is_some_and(|l| Arc::strong_count(l) == 1) {
            starts.remove(destination);
        }
    }

    /// Remove `destination` only if `session_id` is still its occupant.
    fn deregister(&self, destination: &DestinationId, session_id: SessionId) -> bool {
        let mut sessions = self.sessions();
        match sessions.get(destination) {
            Some(current) if current.id() == session_id => {
                sessions.remove(destination);
                true
            }
            Some(_) => {
                debug!(%destination, session.id = %session_id, "stale deregistration ignored");
                false
            }
            None => false,
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let sessions = self.sessions.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, session) in sessions.drain() {
            session.cancel();
            session.disconnect();
        }
    }
}

/// Maps destinations to their live session.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn TransportSink>,
        sources: Arc<dyn SourceFactory>,
        encoders: Arc<dyn EncoderFactory>,
        options: RegistryOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                starts: Mutex::new(HashMap::new()),
                transport,
                sources,
                encoders,
                options,
                events,
            }),
        }
    }

    /// Start streaming `stream_url` to `destination`, replacing any live session.
    ///
    /// Returns once the pump task is launched. A start racing another on the
    /// same destination waits for it; dropping the returned future leaves no
    /// half-installed session behind.
    pub async fn start(
        &self,
        destination: DestinationId,
        channel: ChannelTarget,
        stream_url: &str,
        track: Track,
        requested_by: impl Into<String>,
    ) -> Result<SessionId, StartError> {
        let lock = self.inner.start_lock(&destination);
        let result = {
            let _serialized = lock.lock().await;
            self.start_locked(destination.clone(), channel, stream_url, track, requested_by.into())
                .await
        };
        self.inner.release_start_lock(&destination, lock);
        result
    }

    async fn start_locked(
        &self,
        destination: DestinationId,
        channel: ChannelTarget,
        stream_url: &str,
        track: Track,
        requested_by: String,
    ) -> Result<SessionId, StartError> {
        // The occupant keeps its slot until its pump deregisters it.
        if let Some(previous) = self.get(&destination) {
            info!(%destination, session.id = %previous.id(), "replacing session");
            previous.cancel();
            previous.wait_terminated().await;
        }

        let format = self.inner.options.format;
        let encoder = self
            .inner
            .encoders
            .create(&format)
            .map_err(StartError::Encode)?;

        let sink = self
            .inner
            .transport
            .join(&destination, &channel)
            .await
            .map_err(StartError::Connection)?;

        let source = match self.inner.sources.open(stream_url, &format) {
            Ok(source) => source,
            Err(e) => {
                sink.disconnect();
                return Err(StartError::Decode(e));
            }
        };

        // No await from here on: install and spawn happen together.
        let session = Arc::new(Session::new(
            destination.clone(),
            channel,
            track,
            requested_by,
            sink,
        ));
        let session_id = session.id();
        self.inner
            .sessions()
            .insert(destination.clone(), session.clone());

        let pump = Pump::new(
            session.clone(),
            source,
            encoder,
            format,
            self.inner.options.pump,
        );
        let teardown = Teardown {
            registry: Arc::downgrade(&self.inner),
            session: session.clone(),
            outcome: None,
        };
        let span = info_span!(
            "jamboree.session",
            destination = %destination,
            session.id = %session_id,
            track = %session.track().id,
        );
        tokio::spawn(run_session(teardown, pump).instrument(span));

        info!(
            %destination,
            session.id = %session_id,
            channel = %session.channel(),
            requested_by = %session.requested_by(),
            "session started"
        );
        self.inner.publish(SessionEvent::Started {
            destination,
            session_id,
            track: session.track().clone(),
        });

        Ok(session_id)
    }

    /// Pause the session on `destination`. No-op when absent.
    pub fn pause(&self, destination: &DestinationId) {
        if let Some(session) = self.get(destination) {
            if session.pause() {
                info!(%destination, "paused");
            }
        }
    }

    /// Resume the session on `destination`. No-op when absent.
    pub fn resume(&self, destination: &DestinationId) {
        if let Some(session) = self.get(destination) {
            if session.resume() {
                info!(%destination, "resumed");
            }
        }
    }

    /// Cancel the session on `destination` without waiting for teardown.
    pub fn stop(&self, destination: &DestinationId) {
        if let Some(session) = self.get(destination) {
            if !session.is_cancelled() {
                info!(%destination, session.id = %session.id(), "stopping");
            }
            session.cancel();
        }
    }

    /// Release the sink on `destination` directly.
    pub fn leave(&self, destination: &DestinationId) {
        if let Some(session) = self.get(destination) {
            info!(%destination, session.id = %session.id(), "leaving channel");
            session.disconnect();
        }
    }

    pub fn track_info(&self, destination: &DestinationId) -> Option<TrackInfo> {
        self.get(destination).map(|session| TrackInfo {
            track: session.track().clone(),
            requested_by: session.requested_by().to_string(),
            channel: session.channel().clone(),
        })
    }

    pub fn is_paused(&self, destination: &DestinationId) -> bool {
        self.get(destination).is_some_and(|s| s.is_paused())
    }

    /// True once `stop` (or a replacement) has signalled the session.
    pub fn is_cancelled(&self, destination: &DestinationId) -> bool {
        self.get(destination).is_some_and(|s| s.is_cancelled())
    }

    pub fn state(&self, destination: &DestinationId) -> Option<SessionState> {
        self.get(destination).map(|s| s.state())
    }

    pub fn session_id(&self, destination: &DestinationId) -> Option<SessionId> {
        self.get(destination).map(|s| s.id())
    }

    /// Destinations with an installed session, sorted.
    pub fn active(&self) -> Vec<DestinationId> {
        let mut active: Vec<_> = self.inner.sessions().keys().cloned().collect();
        active.sort();
        active
    }

    pub fn len(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel and release every session, then wait for their pumps to finish.
    pub async fn stop_all(&self) {
        let stopping: Vec<Arc<Session>> = {
            let sessions = self.inner.sessions();
            for session in sessions.values() {
                session.cancel();
                session.disconnect();
            }
            sessions.values().cloned().collect()
        };

        if !stopping.is_empty() {
            info!(count = stopping.len(), "stopping all sessions");
        }
        for session in stopping {
            session.wait_terminated().await;
            self.inner.deregister(session.destination(), session.id());
        }
    }

    fn get(&self, destination: &DestinationId) -> Option<Arc<Session>> {
        self.inner.sessions().get(destination).cloned()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.active())
            .finish()
    }
}

/// Owned by the pump task, so the session's final release runs however the
/// task ends. `Terminated` is always the last step.
struct Teardown {
    registry: Weak<RegistryInner>,
    session: Arc<Session>,
    outcome: Option<SessionOutcome>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        let session = &self.session;
        session.disconnect();

        let outcome = self.outcome.take().unwrap_or_else(|| {
            error!("pump task ended without an outcome");
            SessionOutcome::Failed {
                frames: 0,
                error: Arc::new(SessionError::Panicked),
            }
        });
        if let Some(inner) = self.registry.upgrade() {
            inner.deregister(session.destination(), session.id());
            inner.publish(SessionEvent::Ended {
                destination: session.destination().clone(),
                session_id: session.id(),
                outcome,
            });
        }

        session.mark_terminated();
        debug!(uptime_ms = session.uptime().as_millis() as u64, "session terminated");
    }
}

async fn run_session(mut teardown: Teardown, pump: Pump) {
    teardown.outcome = Some(pump.run().await);
}
