//! Config file discovery, loading, and environment variable overlay.

use crate::{Codec, ConfigError, JamConfig};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli). Only existing files
/// are returned.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/jamboree/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("jamboree/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("jamboree.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, recursing into nested tables.
///
/// Scalars and arrays in `overlay` replace those in `base`; tables merge key
/// by key, so a later file only needs to mention what it changes.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table into a typed config.
pub fn from_table(table: toml::Table, origin: Option<&PathBuf>) -> Result<JamConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.cloned().unwrap_or_else(|| PathBuf::from("<merged>")),
            message: e.to_string(),
        })
}

/// Apply process environment overrides to config.
pub fn apply_env_overrides(config: &mut JamConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Later names in each list win, so the `JAMBOREE_*` spelling beats the
/// legacy one when both are set.
pub fn apply_overrides_from<F>(config: &mut JamConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |names: &[&str], target: &mut String, sources: &mut ConfigSources| {
        for name in names {
            if let Some(v) = lookup(name) {
                *target = v;
                sources.env_overrides.push(name.to_string());
            }
        }
    };

    // Catalog (MUSIC_API_* are the legacy names)
    string(
        &["MUSIC_API_BASE", "JAMBOREE_CATALOG_URL"],
        &mut config.catalog.base_url,
        sources,
    );
    string(
        &["MUSIC_API_PREFIX", "JAMBOREE_CATALOG_PREFIX"],
        &mut config.catalog.prefix,
        sources,
    );

    // Decoder
    string(
        &["FFMPEG_PATH", "JAMBOREE_FFMPEG_PATH"],
        &mut config.decoder.ffmpeg_path,
        sources,
    );

    // Transport
    string(
        &["JAMBOREE_TRANSPORT_BIND"],
        &mut config.transport.bind_addr,
        sources,
    );

    // Bind
    string(
        &["JAMBOREE_HEALTH_HOST"],
        &mut config.bind.health_host,
        sources,
    );

    // Telemetry; RUST_LOG is the standard filter variable
    string(
        &["JAMBOREE_LOG_LEVEL", "RUST_LOG"],
        &mut config.telemetry.log_level,
        sources,
    );
    for name in ["JAMBOREE_OTLP_ENDPOINT", "OTEL_EXPORTER_OTLP_ENDPOINT"] {
        if let Some(v) = lookup(name) {
            config.telemetry.otlp_endpoint = Some(v);
            sources.env_overrides.push(name.to_string());
        }
    }

    parsed(&lookup, &["JAMBOREE_CATALOG_TIMEOUT_MS"], &mut config.catalog.timeout_ms, sources);
    parsed(&lookup, &["JAMBOREE_SEARCH_LIMIT"], &mut config.catalog.search_limit, sources);
    parsed(&lookup, &["JAMBOREE_DECODER_RECONNECT"], &mut config.decoder.reconnect, sources);
    parsed(
        &lookup,
        &["JAMBOREE_DECODER_RECONNECT_DELAY_MAX"],
        &mut config.decoder.reconnect_delay_max_secs,
        sources,
    );
    parsed(&lookup, &["JAMBOREE_SAMPLE_RATE"], &mut config.playback.sample_rate, sources);
    parsed(&lookup, &["JAMBOREE_CHANNELS"], &mut config.playback.channels, sources);
    parsed(&lookup, &["JAMBOREE_FRAME_SIZE"], &mut config.playback.frame_size, sources);
    parsed(
        &lookup,
        &["JAMBOREE_MAX_PACKET_BYTES"],
        &mut config.playback.max_packet_bytes,
        sources,
    );
    parsed(
        &lookup,
        &["JAMBOREE_SEND_TIMEOUT_MS"],
        &mut config.playback.send_timeout_ms,
        sources,
    );
    parsed(&lookup, &["JAMBOREE_WARMUP_MS"], &mut config.playback.warmup_ms, sources);
    parsed::<Codec, _>(&lookup, &["JAMBOREE_CODEC"], &mut config.playback.codec, sources);
    parsed(
        &lookup,
        &["JAMBOREE_TRANSPORT_QUEUE_DEPTH"],
        &mut config.transport.queue_depth,
        sources,
    );
    // PORT is what container platforms inject for the health probe
    parsed(
        &lookup,
        &["PORT", "JAMBOREE_HEALTH_PORT"],
        &mut config.bind.health_port,
        sources,
    );
}

/// Override `target` from each parseable variable in `names`; later names win.
fn parsed<T, F>(lookup: &F, names: &[&str], target: &mut T, sources: &mut ConfigSources)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    for name in names {
        if let Some(Ok(v)) = lookup(name).map(|raw| raw.trim().parse::<T>()) {
            *target = v;
            sources.env_overrides.push(name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files_with_override(None);
    }

    #[test]
    fn test_merge_tables_is_field_by_field() {
        let mut base: toml::Table = r#"
[playback]
sample_rate = 44100
frame_size = 480
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[playback]
frame_size = 960

[catalog]
base_url = "http://catalog"
"#
        .parse()
        .unwrap();

        merge_tables(&mut base, overlay);
        let config = from_table(base, None).unwrap();

        assert_eq!(config.playback.sample_rate, 44100);
        assert_eq!(config.playback.frame_size, 960);
        assert_eq!(config.catalog.base_url, "http://catalog");
        assert_eq!(config.catalog.prefix, "/api");
    }

    #[test]
    fn test_load_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[decoder]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
reconnect = false

[playback]
codec = "pcm"
send_timeout_ms = 500
"#
        )
        .unwrap();

        let table = load_table(file.path()).unwrap();
        let config = from_table(table, None).unwrap();

        assert_eq!(config.decoder.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert!(!config.decoder.reconnect);
        assert_eq!(config.playback.codec, Codec::Pcm);
        assert_eq!(config.playback.send_timeout_ms, 500);
        assert_eq!(config.playback.frame_size, 960);
    }

    #[test]
    fn test_load_table_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[playback\nsample_rate = ").unwrap();

        let err = load_table(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let table: toml::Table = "[playback]\nsample_rate = \"fast\"\n".parse().unwrap();
        assert!(matches!(
            from_table(table, None),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides_legacy_and_prefixed() {
        let mut config = JamConfig::default();
        let mut sources = ConfigSources::default();
        let lookup = lookup_from(&[
            ("MUSIC_API_BASE", "https://legacy.example.com/"),
            ("MUSIC_API_PREFIX", "v1"),
            ("FFMPEG_PATH", "/usr/local/bin/ffmpeg"),
            ("PORT", "8123"),
            ("JAMBOREE_SEND_TIMEOUT_MS", "750"),
            ("JAMBOREE_CODEC", "pcm"),
        ]);

        apply_overrides_from(&mut config, &mut sources, lookup);
        config.normalize();

        assert_eq!(config.catalog.base_url, "https://legacy.example.com");
        assert_eq!(config.catalog.prefix, "/v1");
        assert_eq!(config.decoder.ffmpeg_path, "/usr/local/bin/ffmpeg");
        assert_eq!(config.bind.health_port, 8123);
        assert_eq!(config.playback.send_timeout_ms, 750);
        assert_eq!(config.playback.codec, Codec::Pcm);
        assert!(sources.env_overrides.contains(&"PORT".to_string()));
    }

    #[test]
    fn test_prefixed_env_beats_legacy() {
        let mut config = JamConfig::default();
        let mut sources = ConfigSources::default();
        let lookup = lookup_from(&[
            ("MUSIC_API_BASE", "https://legacy.example.com"),
            ("JAMBOREE_CATALOG_URL", "https://new.example.com"),
        ]);

        apply_overrides_from(&mut config, &mut sources, lookup);

        assert_eq!(config.catalog.base_url, "https://new.example.com");
        assert_eq!(sources.env_overrides.len(), 2);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let mut config = JamConfig::default();
        let mut sources = ConfigSources::default();
        let lookup = lookup_from(&[("PORT", "not-a-port")]);

        apply_overrides_from(&mut config, &mut sources, lookup);

        assert_eq!(config.bind.health_port, 10_000);
        assert!(sources.env_overrides.is_empty());
    }
}
