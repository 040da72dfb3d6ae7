//! Core identifiers and snapshots shared across the engine.

use jamconf::PlaybackConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Exclusivity key for sessions: at most one live session per destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where the transport should deliver packets (a voice channel, a UDP peer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTarget(pub String);

impl ChannelTarget {
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelTarget {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of one session instance, distinct across replacements of the same destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Track metadata captured when a session starts. Never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// The URL the decoder should open: the direct stream, falling back to the canonical link.
    pub fn playable_url(&self) -> Option<&str> {
        [&self.stream_url, &self.link]
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .find(|s| !s.trim().is_empty())
    }
}

/// Lifecycle of a playback session.
///
/// `Starting → Playing ⇄ Paused → Stopping → Terminated`; any live state may
/// move to `Stopping`, and nothing leaves `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Playing,
    Paused,
    Stopping,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PCM layout shared by decoder, encoder and pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame.
    pub frame_size: usize,
    pub max_packet_bytes: usize,
}

impl AudioFormat {
    /// Interleaved samples in one frame.
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Bytes of s16le PCM in one frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.samples_per_frame() * 2
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(self.frame_size as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for AudioFormat {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
            max_packet_bytes: config.max_packet_bytes,
        }
    }
}
