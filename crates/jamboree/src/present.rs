//! Text rendering of player state and search results.

use crate::types::Track;
use serde::Serialize;
use std::fmt;

/// Most options a selection list may offer.
pub const MAX_SEARCH_OPTIONS: usize = 25;
/// Longest label or description in a selection list.
pub const MAX_OPTION_LABEL: usize = 100;

/// Cut `input` to at most `max` characters, ending in `…` when shortened.
pub fn truncate(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = input.chars().take(max - 1).collect();
    out.push('…');
    out
}

fn or_fallback(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// The "now playing" card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub status: String,
    pub channel: String,
    pub requested_by: String,
    pub link: Option<String>,
    pub artwork: Option<String>,
}

impl NowPlaying {
    pub fn new(track: &Track, status: &str, channel: &str, requested_by: &str) -> Self {
        Self {
            title: or_fallback(&track.title, "Unknown Title"),
            artist: or_fallback(&track.artist, "Unknown Artist"),
            status: or_fallback(status, "Playing"),
            channel: or_fallback(channel, "unknown"),
            requested_by: or_fallback(requested_by, "unknown"),
            link: track.link.clone(),
            artwork: track.image.clone(),
        }
    }
}

impl fmt::Display for NowPlaying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "🎶 Now Playing")?;
        writeln!(f, "  Track:        {}", self.title)?;
        writeln!(f, "  Artist:       {}", self.artist)?;
        writeln!(f, "  Status:       {}", self.status)?;
        writeln!(f, "  Voice:        {}", self.channel)?;
        write!(f, "  Requested by: {}", self.requested_by)?;
        if let Some(link) = &self.link {
            write!(f, "\n  Link:         {}", link)?;
        }
        if let Some(artwork) = &self.artwork {
            write!(f, "\n  Artwork:      {}", artwork)?;
        }
        Ok(())
    }
}

/// One entry of a search result picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOption {
    pub label: String,
    pub description: String,
    /// Track id to hand back on selection.
    pub value: String,
}

pub fn search_options(tracks: &[Track]) -> Vec<SearchOption> {
    tracks
        .iter()
        .take(MAX_SEARCH_OPTIONS)
        .map(|track| SearchOption {
            label: truncate(&format!("{} — {}", track.title, track.artist), MAX_OPTION_LABEL),
            description: truncate(&track.artist, MAX_OPTION_LABEL),
            value: track.id.clone(),
        })
        .collect()
}
