//! Configuration sections, one struct per TOML table.

use serde::{Deserialize, Serialize};

/// Remote music catalog API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog service, without trailing slash.
    /// Default: empty (must be configured before searching)
    #[serde(default)]
    pub base_url: String,

    /// Path prefix prepended to every endpoint.
    /// Default: /api
    #[serde(default = "CatalogConfig::default_prefix")]
    pub prefix: String,

    /// HTTP request timeout in milliseconds.
    /// Default: 12000
    #[serde(default = "CatalogConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of search results offered for selection.
    /// Default: 25
    #[serde(default = "CatalogConfig::default_search_limit")]
    pub search_limit: usize,
}

impl CatalogConfig {
    fn default_prefix() -> String {
        "/api".to_string()
    }

    fn default_timeout_ms() -> u64 {
        12_000
    }

    fn default_search_limit() -> usize {
        25
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            prefix: Self::default_prefix(),
            timeout_ms: Self::default_timeout_ms(),
            search_limit: Self::default_search_limit(),
        }
    }
}

/// External transcoder process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Path to the ffmpeg executable.
    /// Default: ffmpeg (resolved through PATH)
    #[serde(default = "DecoderConfig::default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Let ffmpeg reconnect on transient network failures.
    /// Default: true
    #[serde(default = "DecoderConfig::default_reconnect")]
    pub reconnect: bool,

    /// Upper bound for ffmpeg's reconnect backoff, in seconds.
    /// Default: 5
    #[serde(default = "DecoderConfig::default_reconnect_delay_max_secs")]
    pub reconnect_delay_max_secs: u32,

    /// Read buffer size for the PCM pipe, in bytes.
    /// Default: 1 MiB
    #[serde(default = "DecoderConfig::default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
}

impl DecoderConfig {
    fn default_ffmpeg_path() -> String {
        "ffmpeg".to_string()
    }

    fn default_reconnect() -> bool {
        true
    }

    fn default_reconnect_delay_max_secs() -> u32 {
        5
    }

    fn default_read_buffer_bytes() -> usize {
        1 << 20
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: Self::default_ffmpeg_path(),
            reconnect: Self::default_reconnect(),
            reconnect_delay_max_secs: Self::default_reconnect_delay_max_secs(),
            read_buffer_bytes: Self::default_read_buffer_bytes(),
        }
    }
}

/// Packet codec used by the frame pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Opus packets (the engine crate's default `opus` feature).
    #[default]
    Opus,
    /// Raw 16-bit little-endian PCM packets.
    Pcm,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Opus => "opus",
            Codec::Pcm => "pcm",
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opus" => Ok(Codec::Opus),
            "pcm" => Ok(Codec::Pcm),
            other => Err(format!("unknown codec: {}", other)),
        }
    }
}

/// Frame pump settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Sample rate of decoded PCM.
    /// Default: 48000
    #[serde(default = "PlaybackConfig::default_sample_rate")]
    pub sample_rate: u32,

    /// Interleaved channel count.
    /// Default: 2
    #[serde(default = "PlaybackConfig::default_channels")]
    pub channels: u16,

    /// Samples per channel in one frame (960 = 20ms at 48kHz).
    /// Default: 960
    #[serde(default = "PlaybackConfig::default_frame_size")]
    pub frame_size: usize,

    /// Upper bound for one encoded packet.
    /// Default: 4000
    #[serde(default = "PlaybackConfig::default_max_packet_bytes")]
    pub max_packet_bytes: usize,

    /// How long the sink may take to accept one packet.
    /// Default: 2000
    #[serde(default = "PlaybackConfig::default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Delay between joining the transport and the first frame.
    /// Default: 300
    #[serde(default = "PlaybackConfig::default_warmup_ms")]
    pub warmup_ms: u64,

    /// Packet codec.
    /// Default: opus
    #[serde(default)]
    pub codec: Codec,
}

impl PlaybackConfig {
    fn default_sample_rate() -> u32 {
        48_000
    }

    fn default_channels() -> u16 {
        2
    }

    fn default_frame_size() -> usize {
        960
    }

    fn default_max_packet_bytes() -> usize {
        4000
    }

    fn default_send_timeout_ms() -> u64 {
        2000
    }

    fn default_warmup_ms() -> u64 {
        300
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            channels: Self::default_channels(),
            frame_size: Self::default_frame_size(),
            max_packet_bytes: Self::default_max_packet_bytes(),
            send_timeout_ms: Self::default_send_timeout_ms(),
            warmup_ms: Self::default_warmup_ms(),
            codec: Codec::default(),
        }
    }
}

/// Voice transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Packets buffered between the pump and the socket writer.
    /// Default: 2
    #[serde(default = "TransportConfig::default_queue_depth")]
    pub queue_depth: usize,

    /// Local address UDP sockets bind to.
    /// Default: 0.0.0.0:0
    #[serde(default = "TransportConfig::default_bind_addr")]
    pub bind_addr: String,
}

impl TransportConfig {
    fn default_queue_depth() -> usize {
        2
    }

    fn default_bind_addr() -> String {
        "0.0.0.0:0".to_string()
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_depth: Self::default_queue_depth(),
            bind_addr: Self::default_bind_addr(),
        }
    }
}

/// Network bind addresses for this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Host for the health endpoint.
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_health_host")]
    pub health_host: String,

    /// Port for the health endpoint.
    /// Default: 10000
    #[serde(default = "BindConfig::default_health_port")]
    pub health_port: u16,
}

impl BindConfig {
    fn default_health_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_health_port() -> u16 {
        10_000
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            health_host: Self::default_health_host(),
            health_port: Self::default_health_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. Export is disabled when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_defaults() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.sample_rate, 48_000);
        assert_eq!(playback.channels, 2);
        assert_eq!(playback.frame_size, 960);
        assert_eq!(playback.max_packet_bytes, 4000);
        assert_eq!(playback.send_timeout_ms, 2000);
        assert_eq!(playback.codec, Codec::Opus);
    }

    #[test]
    fn test_codec_parse() {
        assert_eq!("OPUS".parse::<Codec>().unwrap(), Codec::Opus);
        assert_eq!(" pcm ".parse::<Codec>().unwrap(), Codec::Pcm);
        assert!("mp3".parse::<Codec>().is_err());
    }

    #[test]
    fn test_catalog_defaults() {
        let catalog = CatalogConfig::default();
        assert!(catalog.base_url.is_empty());
        assert_eq!(catalog.prefix, "/api");
        assert_eq!(catalog.search_limit, 25);
    }
}
