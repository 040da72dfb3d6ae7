//! Playback sessions and the frame pump.
//!
//! A [`Session`] is the shared, registry-visible half: identity, metadata,
//! pause gate, cancellation token and lifecycle state. The [`Pump`] is the
//! half that runs on the session's own task and owns the decoder and encoder.
//!
//! # Loop
//!
//! Once per frame: check cancellation, wait out a pause, read a frame, encode
//! it, hand it to the sink under a timeout. Whatever ends the loop, the pump
//! then shuts the decoder down, turns speaking off and disconnects the sink.

use crate::decoder::{DecodeError, PcmSource};
use crate::encoder::{EncodeError, FrameEncoder};
use crate::gate::{Cancelled, PauseGate};
use crate::transport::{SinkHandle, TransportError};
use crate::types::{AudioFormat, ChannelTarget, DestinationId, SessionId, SessionState, Track};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Why a pump stopped early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport did not accept a packet within {0:?}")]
    SendTimeout(Duration),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("session cancelled")]
    Cancelled,

    #[error("frame pump panicked")]
    Panicked,
}

impl From<Cancelled> for SessionError {
    fn from(_: Cancelled) -> Self {
        SessionError::Cancelled
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The source reached end of stream.
    Finished { frames: u64 },
    /// Stopped through the cancellation token.
    Cancelled { frames: u64 },
    Failed { frames: u64, error: Arc<SessionError> },
}

impl SessionOutcome {
    pub fn frames(&self) -> u64 {
        match self {
            SessionOutcome::Finished { frames }
            | SessionOutcome::Cancelled { frames }
            | SessionOutcome::Failed { frames, .. } => *frames,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SessionOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// One active stream to one destination.
pub struct Session {
    id: SessionId,
    destination: DestinationId,
    channel: ChannelTarget,
    track: Track,
    requested_by: String,
    sink: Arc<dyn SinkHandle>,
    gate: PauseGate,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    started_at: Instant,
}

impl Session {
    pub(crate) fn new(
        destination: DestinationId,
        channel: ChannelTarget,
        track: Track,
        requested_by: String,
        sink: Arc<dyn SinkHandle>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Starting);
        Self {
            id: SessionId::generate(),
            destination,
            channel,
            track,
            requested_by,
            sink,
            gate: PauseGate::new(),
            cancel: CancellationToken::new(),
            state,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    pub fn channel(&self) -> &ChannelTarget {
        &self.channel
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns true if the flag changed.
    pub fn pause(&self) -> bool {
        let changed = self.gate.set_paused(true);
        self.transition(|s| (s == SessionState::Playing).then_some(SessionState::Paused));
        changed
    }

    /// Returns true if the flag changed.
    pub fn resume(&self) -> bool {
        let changed = self.gate.set_paused(false);
        self.transition(|s| (s == SessionState::Paused).then_some(SessionState::Playing));
        changed
    }

    /// Signal the pump to stop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release the sink without waiting for the pump.
    pub fn disconnect(&self) {
        self.sink.disconnect();
    }

    /// Resolve once the pump has released everything.
    pub async fn wait_terminated(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
    }

    /// Apply `next` to the current state unless the session already terminated.
    fn transition(&self, next: impl FnOnce(SessionState) -> Option<SessionState>) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            match next(*current) {
                Some(state) if state != *current => {
                    *current = state;
                    true
                }
                _ => false,
            }
        })
    }

    /// Leave `Starting` for whichever state the pause flag calls for.
    ///
    /// The flag is read while the state is locked. `pause` and `resume` flip
    /// the flag before they transition, so whichever side runs second sees
    /// the other's write.
    fn mark_streaming(&self) {
        self.transition(|s| {
            (s == SessionState::Starting).then(|| {
                if self.gate.is_paused() {
                    SessionState::Paused
                } else {
                    SessionState::Playing
                }
            })
        });
    }

    fn mark_stopping(&self) {
        self.transition(|_| Some(SessionState::Stopping));
    }

    pub(crate) fn mark_terminated(&self) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = SessionState::Terminated;
                true
            }
        });
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("channel", &self.channel)
            .field("track", &self.track.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Timing knobs for the pump.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub send_timeout: Duration,
    pub warmup: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            warmup: Duration::from_millis(300),
        }
    }
}

/// Drives one session's decode, encode and send loop.
pub(crate) struct Pump {
    session: Arc<Session>,
    source: Box<dyn PcmSource>,
    encoder: Box<dyn FrameEncoder>,
    format: AudioFormat,
    settings: PumpSettings,
    frames: u64,
    speaking: bool,
}

impl Pump {
    pub(crate) fn new(
        session: Arc<Session>,
        source: Box<dyn PcmSource>,
        encoder: Box<dyn FrameEncoder>,
        format: AudioFormat,
        settings: PumpSettings,
    ) -> Self {
        Self {
            session,
            source,
            encoder,
            format,
            settings,
            frames: 0,
            speaking: false,
        }
    }

    /// Run to completion and release every owned resource.
    ///
    /// Leaves the session in `Stopping`; the caller deregisters it and marks
    /// it terminated.
    pub(crate) async fn run(mut self) -> SessionOutcome {
        let result = AssertUnwindSafe(self.stream())
            .catch_unwind()
            .await
            .unwrap_or(Err(SessionError::Panicked));

        self.session.mark_stopping();
        self.release().await;

        let frames = self.frames;
        match result {
            Ok(()) => {
                info!(frames, "session finished");
                SessionOutcome::Finished { frames }
            }
            Err(SessionError::Cancelled) => {
                info!(frames, "session cancelled");
                SessionOutcome::Cancelled { frames }
            }
            Err(error) => {
                match &error {
                    SessionError::Panicked => error!(frames, "session failed: {}", error),
                    _ => warn!(frames, "session failed: {}", error),
                }
                SessionOutcome::Failed {
                    frames,
                    error: Arc::new(error),
                }
            }
        }
    }

    async fn stream(&mut self) -> Result<(), SessionError> {
        let cancel = self.session.cancel.clone();
        let sink = self.session.sink.clone();
        let send_timeout = self.settings.send_timeout;

        if !self.settings.warmup.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(self.settings.warmup) => {}
            }
        }

        match tokio::time::timeout(send_timeout, sink.set_speaking(true)).await {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::SendTimeout(send_timeout)),
        }
        self.speaking = true;
        self.session.mark_streaming();
        info!(track = %self.session.track.id, "session streaming");

        let mut pcm = vec![0i16; self.format.samples_per_frame()];
        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            self.session.gate.wait_while_paused(&cancel).await?;

            let more = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                read = self.source.read_frame(&mut pcm) => read?,
            };
            if !more {
                debug!(frames = self.frames, "end of stream");
                return Ok(());
            }

            let packet = self.encoder.encode(&pcm)?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                sent = tokio::time::timeout(send_timeout, sink.send(packet)) => match sent {
                    Ok(result) => result?,
                    Err(_) => return Err(SessionError::SendTimeout(send_timeout)),
                },
            }

            self.frames += 1;
            trace!(frames = self.frames, "frame sent");
        }
    }

    async fn release(&mut self) {
        self.source.shutdown().await;

        let sink = &self.session.sink;
        if self.speaking && sink.is_connected() {
            match tokio::time::timeout(self.settings.send_timeout, sink.set_speaking(false)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "failed to clear speaking"),
                Err(_) => debug!("timed out clearing speaking"),
            }
        }
        sink.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
        disconnected: AtomicBool,
    }

    #[async_trait]
    impl SinkHandle for CountingSink {
        async fn set_speaking(&self, _speaking: bool) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, _packet: Bytes) -> Result<(), TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            !self.disconnected.load(Ordering::SeqCst)
        }
    }

    struct Frames {
        left: usize,
        shut_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PcmSource for Frames {
        async fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool, DecodeError> {
            if self.left == 0 {
                return Ok(false);
            }
            self.left -= 1;
            frame.fill(7);
            Ok(true)
        }

        async fn shutdown(&mut self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl FrameEncoder for Exploding {
        fn encode(&mut self, _frame: &[i16]) -> Result<Bytes, EncodeError> {
            panic!("encoder blew up");
        }
    }

    fn format() -> AudioFormat {
        AudioFormat {
            frame_size: 4,
            ..AudioFormat::default()
        }
    }

    fn settings() -> PumpSettings {
        PumpSettings {
            send_timeout: Duration::from_millis(200),
            warmup: Duration::ZERO,
        }
    }

    fn session(sink: Arc<CountingSink>) -> Arc<Session> {
        Arc::new(Session::new(
            "g1".into(),
            "vc1".into(),
            Track::new("t1", "Song"),
            "@alice".to_string(),
            sink,
        ))
    }

    #[tokio::test]
    async fn test_pump_runs_to_end_of_stream() {
        let sink = Arc::new(CountingSink::default());
        let session = session(sink.clone());
        let shut_down = Arc::new(AtomicBool::new(false));
        let pump = Pump::new(
            session.clone(),
            Box::new(Frames { left: 5, shut_down: shut_down.clone() }),
            Box::new(crate::encoder::PcmEncoder::new(&format())),
            format(),
            settings(),
        );

        let outcome = pump.run().await;

        assert!(matches!(outcome, SessionOutcome::Finished { frames: 5 }));
        assert_eq!(sink.sent.load(Ordering::SeqCst), 5);
        assert!(sink.disconnected.load(Ordering::SeqCst));
        assert!(shut_down.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Stopping);
    }

    #[tokio::test]
    async fn test_panicking_encoder_still_releases() {
        let sink = Arc::new(CountingSink::default());
        let session = session(sink.clone());
        let shut_down = Arc::new(AtomicBool::new(false));
        let pump = Pump::new(
            session.clone(),
            Box::new(Frames { left: 5, shut_down: shut_down.clone() }),
            Box::new(Exploding),
            format(),
            settings(),
        );

        let outcome = pump.run().await;

        assert!(matches!(outcome.error(), Some(SessionError::Panicked)));
        assert!(sink.disconnected.load(Ordering::SeqCst));
        assert!(shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_during_warmup() {
        let sink = Arc::new(CountingSink::default());
        let session = session(sink.clone());
        let pump = Pump::new(
            session.clone(),
            Box::new(Frames { left: 5, shut_down: Arc::default() }),
            Box::new(crate::encoder::PcmEncoder::new(&format())),
            format(),
            PumpSettings {
                warmup: Duration::from_secs(30),
                ..settings()
            },
        );

        session.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(1), pump.run())
            .await
            .unwrap();

        assert!(matches!(outcome, SessionOutcome::Cancelled { frames: 0 }));
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_state_transitions() {
        let session = session(Arc::new(CountingSink::default()));
        assert_eq!(session.state(), SessionState::Starting);

        // Pausing before the first frame only flips the flag.
        session.pause();
        assert_eq!(session.state(), SessionState::Starting);
        session.mark_streaming();
        assert_eq!(session.state(), SessionState::Paused);

        session.resume();
        assert_eq!(session.state(), SessionState::Playing);
        session.pause();
        assert_eq!(session.state(), SessionState::Paused);

        session.mark_stopping();
        session.resume();
        assert_eq!(session.state(), SessionState::Stopping);

        session.mark_terminated();
        session.mark_streaming();
        session.pause();
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_state_follows_flag_when_resume_races_first_frame() {
        for _ in 0..200 {
            let session = session(Arc::new(CountingSink::default()));
            session.pause();

            std::thread::scope(|scope| {
                scope.spawn(|| session.mark_streaming());
                scope.spawn(|| session.resume());
            });

            assert!(!session.is_paused());
            assert_eq!(session.state(), SessionState::Playing);
        }
    }

    #[test]
    fn test_state_follows_flag_when_pause_races_first_frame() {
        for _ in 0..200 {
            let session = session(Arc::new(CountingSink::default()));

            std::thread::scope(|scope| {
                scope.spawn(|| session.mark_streaming());
                scope.spawn(|| session.pause());
            });

            assert!(session.is_paused());
            assert_eq!(session.state(), SessionState::Paused);
        }
    }
}
