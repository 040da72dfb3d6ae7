//! Configuration loading for Jamboree.
//!
//! Every setting has a compiled default, so an empty environment yields a
//! usable config (apart from the catalog base URL, which searching needs).
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, field by field):
//! 1. `/etc/jamboree/config.toml` (system)
//! 2. `~/.config/jamboree/config.toml` (user)
//! 3. `./jamboree.toml` (local override) or the path given on the command line
//! 4. Environment variables (`JAMBOREE_*`, plus a few legacy names)
//!
//! # Example Config
//!
//! ```toml
//! [catalog]
//! base_url = "https://music.example.com"
//! prefix = "/api"
//!
//! [decoder]
//! ffmpeg_path = "/usr/bin/ffmpeg"
//!
//! [playback]
//! codec = "opus"
//! send_timeout_ms = 2000
//!
//! [bind]
//! health_port = 10000
//!
//! [telemetry]
//! log_level = "info,jamboree=debug"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    BindConfig, CatalogConfig, Codec, DecoderConfig, PlaybackConfig, TelemetryConfig,
    TransportConfig,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete Jamboree configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JamConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl JamConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local override.
    ///
    /// System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last())?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.normalize();
        config.validate()?;

        Ok((config, sources))
    }

    /// Canonicalize values that several sources may spell differently.
    pub fn normalize(&mut self) {
        self.catalog.base_url = self.catalog.base_url.trim().trim_end_matches('/').to_string();

        let prefix = self.catalog.prefix.trim().trim_matches('/').to_string();
        self.catalog.prefix = if prefix.is_empty() {
            "/api".to_string()
        } else {
            format!("/{}", prefix)
        };

        self.decoder.ffmpeg_path = self.decoder.ffmpeg_path.trim().to_string();
        if self.decoder.ffmpeg_path.is_empty() {
            self.decoder.ffmpeg_path = "ffmpeg".to_string();
        }
    }

    /// Reject values the frame pump cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let playback = &self.playback;
        if playback.sample_rate == 0 {
            return Err(ConfigError::Invalid("playback.sample_rate must be > 0".into()));
        }
        if playback.channels == 0 {
            return Err(ConfigError::Invalid("playback.channels must be > 0".into()));
        }
        if playback.frame_size == 0 {
            return Err(ConfigError::Invalid("playback.frame_size must be > 0".into()));
        }
        if playback.max_packet_bytes == 0 {
            return Err(ConfigError::Invalid("playback.max_packet_bytes must be > 0".into()));
        }
        if self.transport.queue_depth == 0 {
            return Err(ConfigError::Invalid("transport.queue_depth must be > 0".into()));
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Jamboree Configuration\n\n");

        output.push_str("[catalog]\n");
        output.push_str(&format!("base_url = \"{}\"\n", self.catalog.base_url));
        output.push_str(&format!("prefix = \"{}\"\n", self.catalog.prefix));
        output.push_str(&format!("timeout_ms = {}\n", self.catalog.timeout_ms));
        output.push_str(&format!("search_limit = {}\n", self.catalog.search_limit));

        output.push_str("\n[decoder]\n");
        output.push_str(&format!("ffmpeg_path = \"{}\"\n", self.decoder.ffmpeg_path));
        output.push_str(&format!("reconnect = {}\n", self.decoder.reconnect));
        output.push_str(&format!(
            "reconnect_delay_max_secs = {}\n",
            self.decoder.reconnect_delay_max_secs
        ));
        output.push_str(&format!(
            "read_buffer_bytes = {}\n",
            self.decoder.read_buffer_bytes
        ));

        output.push_str("\n[playback]\n");
        output.push_str(&format!("sample_rate = {}\n", self.playback.sample_rate));
        output.push_str(&format!("channels = {}\n", self.playback.channels));
        output.push_str(&format!("frame_size = {}\n", self.playback.frame_size));
        output.push_str(&format!(
            "max_packet_bytes = {}\n",
            self.playback.max_packet_bytes
        ));
        output.push_str(&format!(
            "send_timeout_ms = {}\n",
            self.playback.send_timeout_ms
        ));
        output.push_str(&format!("warmup_ms = {}\n", self.playback.warmup_ms));
        output.push_str(&format!("codec = \"{}\"\n", self.playback.codec.as_str()));

        output.push_str("\n[transport]\n");
        output.push_str(&format!("queue_depth = {}\n", self.transport.queue_depth));
        output.push_str(&format!("bind_addr = \"{}\"\n", self.transport.bind_addr));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("health_host = \"{}\"\n", self.bind.health_host));
        output.push_str(&format!("health_port = {}\n", self.bind.health_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JamConfig::default();
        assert_eq!(config.bind.health_port, 10_000);
        assert_eq!(config.playback.frame_size, 960);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips_through_parser() {
        let mut config = JamConfig::default();
        config.catalog.base_url = "https://music.example.com".to_string();
        config.telemetry.otlp_endpoint = Some("127.0.0.1:4317".to_string());

        let rendered = config.to_toml();
        assert!(rendered.contains("[catalog]"));
        assert!(rendered.contains("[playback]"));

        let reparsed: JamConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_normalize_catalog_paths() {
        let mut config = JamConfig::default();
        config.catalog.base_url = " https://music.example.com/ ".to_string();
        config.catalog.prefix = "v2/".to_string();
        config.normalize();
        assert_eq!(config.catalog.base_url, "https://music.example.com");
        assert_eq!(config.catalog.prefix, "/v2");

        config.catalog.prefix = "  ".to_string();
        config.normalize();
        assert_eq!(config.catalog.prefix, "/api");
    }

    #[test]
    fn test_validate_rejects_zero_frame() {
        let mut config = JamConfig::default();
        config.playback.frame_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
