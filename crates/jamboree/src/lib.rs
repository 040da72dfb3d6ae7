//! Jamboree: voice-channel playback engine
//!
//! Streams remote audio to a real-time packet transport, one session per
//! destination. The engine is the [`SessionRegistry`] and the frame pump each
//! session runs:
//!
//! - **Decoder** ([`decoder`]): ffmpeg subprocess turning a URL into s16le PCM
//! - **Encoder** ([`encoder`]): one PCM frame in, one bounded packet out
//! - **Transport** ([`transport`]): join, send, speaking, disconnect
//! - **Registry** ([`registry`]): exclusivity, replacement, teardown
//!
//! Around it sit thin collaborators: the [`catalog`] client, text
//! [`present`]ation, the [`commands`] controller and a [`health`] endpoint.

pub mod catalog;
pub mod commands;
pub mod decoder;
pub mod encoder;
pub mod gate;
pub mod health;
pub mod present;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use catalog::{CatalogClient, CatalogError};
pub use commands::{ControlAction, Controller, PlayError, PlayerView};
pub use decoder::{DecodeError, FfmpegDecoder, FfmpegSourceFactory, PcmSource, SourceFactory};
pub use encoder::{CodecEncoderFactory, EncodeError, EncoderFactory, FrameEncoder, PcmEncoder};
pub use gate::{Cancelled, PauseGate};
pub use present::{search_options, truncate, NowPlaying, SearchOption};
pub use registry::{RegistryOptions, SessionEvent, SessionRegistry, StartError, TrackInfo};
pub use session::{PumpSettings, Session, SessionError, SessionOutcome};
pub use transport::{SinkHandle, TransportError, TransportSink, UdpTransport};
pub use types::{AudioFormat, ChannelTarget, DestinationId, SessionId, SessionState, Track};

#[cfg(feature = "opus")]
pub use encoder::OpusEncoder;
