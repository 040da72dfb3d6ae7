//! Control dispatch: user-facing actions mapped onto the registry.

use crate::catalog::{CatalogClient, CatalogError};
use crate::present::{search_options, NowPlaying, SearchOption};
use crate::registry::{SessionRegistry, StartError};
use crate::types::{ChannelTarget, DestinationId, SessionId, Track};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Player controls. Every action is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
    /// Stop, then drop the transport connection.
    Leave,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Stop => "stop",
            ControlAction::Leave => "leave",
        }
    }

    /// Controls to offer for a player: the pause toggle, stop, leave.
    pub fn available(paused: bool) -> [ControlAction; 3] {
        let toggle = if paused {
            ControlAction::Resume
        } else {
            ControlAction::Pause
        };
        [toggle, ControlAction::Stop, ControlAction::Leave]
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(ControlAction::Pause),
            "resume" | "play" => Ok(ControlAction::Resume),
            "stop" => Ok(ControlAction::Stop),
            "leave" | "disconnect" => Ok(ControlAction::Leave),
            other => Err(format!("unknown control action: {}", other)),
        }
    }
}

/// What the player looks like after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerView {
    Stopped,
    Active { card: NowPlaying, paused: bool },
}

impl PlayerView {
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerView::Active { .. })
    }
}

impl fmt::Display for PlayerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerView::Stopped => write!(f, "Player\n  Status:       Stopped"),
            PlayerView::Active { card, paused } => {
                writeln!(f, "{}", card)?;
                let controls: Vec<&str> = ControlAction::available(*paused)
                    .iter()
                    .map(|a| a.as_str())
                    .collect();
                write!(f, "  Controls:     {}", controls.join(" | "))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PlayError {
    #[error("couldn't load track details: {0}")]
    Catalog(#[from] CatalogError),

    #[error("no playable audio URL found for track {0}")]
    NoPlayableUrl(String),

    #[error("playback error: {0}")]
    Start(#[from] StartError),
}

/// Glue between a command surface, the catalog and the registry.
#[derive(Debug, Clone)]
pub struct Controller {
    registry: SessionRegistry,
    catalog: CatalogClient,
}

impl Controller {
    pub fn new(registry: SessionRegistry, catalog: CatalogClient) -> Self {
        Self { registry, catalog }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchOption>, CatalogError> {
        let tracks = self.catalog.search_tracks(query.trim()).await?;
        Ok(search_options(&tracks))
    }

    /// Resolve `track_id` through the catalog and start playing it.
    pub async fn play(
        &self,
        destination: &DestinationId,
        channel: &ChannelTarget,
        track_id: &str,
        requested_by: &str,
    ) -> Result<(SessionId, PlayerView), PlayError> {
        let track = self.catalog.track_by_id(track_id).await?;
        self.play_track(destination, channel, track, requested_by).await
    }

    /// Start an already-resolved track.
    pub async fn play_track(
        &self,
        destination: &DestinationId,
        channel: &ChannelTarget,
        track: Track,
        requested_by: &str,
    ) -> Result<(SessionId, PlayerView), PlayError> {
        let url = track
            .playable_url()
            .ok_or_else(|| PlayError::NoPlayableUrl(track.id.clone()))?
            .to_string();

        let session_id = self
            .registry
            .start(destination.clone(), channel.clone(), &url, track, requested_by)
            .await?;
        Ok((session_id, self.view(destination)))
    }

    pub fn apply(&self, destination: &DestinationId, action: ControlAction) -> PlayerView {
        info!(%destination, %action, "control");
        match action {
            ControlAction::Pause => self.registry.pause(destination),
            ControlAction::Resume => self.registry.resume(destination),
            ControlAction::Stop => self.registry.stop(destination),
            ControlAction::Leave => {
                self.registry.stop(destination);
                self.registry.leave(destination);
            }
        }
        self.view(destination)
    }

    /// Current player state; a cancelled session already reads as stopped.
    pub fn view(&self, destination: &DestinationId) -> PlayerView {
        let Some(info) = self.registry.track_info(destination) else {
            return PlayerView::Stopped;
        };
        if self.registry.is_cancelled(destination) {
            return PlayerView::Stopped;
        }

        let paused = self.registry.is_paused(destination);
        let status = if paused { "Paused" } else { "Playing" };
        PlayerView::Active {
            card: NowPlaying::new(&info.track, status, info.channel.as_str(), &info.requested_by),
            paused,
        }
    }
}
