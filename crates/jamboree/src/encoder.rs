//! Frame encoders: one PCM frame in, one bounded packet out.
//!
//! Encoders are stateful and owned by exactly one session. A failed call
//! leaves the encoder in an unknown state, so the pump treats every error as
//! fatal.

use crate::types::AudioFormat;
use bytes::Bytes;
use jamconf::Codec;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("frame has {actual} samples, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("encoded packet is {size} bytes, limit is {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("codec error: {0}")]
    Codec(String),
}

pub trait FrameEncoder: Send {
    fn encode(&mut self, frame: &[i16]) -> Result<Bytes, EncodeError>;
}

/// Builds a fresh encoder for each session.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, format: &AudioFormat) -> Result<Box<dyn FrameEncoder>, EncodeError>;
}

/// Raw s16le passthrough.
#[derive(Debug)]
pub struct PcmEncoder {
    samples: usize,
    max_packet_bytes: usize,
}

impl PcmEncoder {
    pub fn new(format: &AudioFormat) -> Self {
        Self {
            samples: format.samples_per_frame(),
            max_packet_bytes: format.max_packet_bytes,
        }
    }
}

impl FrameEncoder for PcmEncoder {
    fn encode(&mut self, frame: &[i16]) -> Result<Bytes, EncodeError> {
        if frame.len() != self.samples {
            return Err(EncodeError::FrameSize {
                expected: self.samples,
                actual: frame.len(),
            });
        }
        let size = frame.len() * 2;
        if size > self.max_packet_bytes {
            return Err(EncodeError::PacketTooLarge {
                size,
                max: self.max_packet_bytes,
            });
        }

        let mut packet = Vec::with_capacity(size);
        for sample in frame {
            packet.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(Bytes::from(packet))
    }
}

#[cfg(feature = "opus")]
pub use opus::OpusEncoder;

#[cfg(feature = "opus")]
mod opus {
    use super::{EncodeError, FrameEncoder};
    use crate::types::AudioFormat;
    use audiopus::coder::Encoder;
    use audiopus::{Application, Channels, SampleRate};
    use bytes::Bytes;

    /// libopus encoder in the `Audio` application mode.
    pub struct OpusEncoder {
        inner: Encoder,
        samples: usize,
        out: Vec<u8>,
    }

    impl OpusEncoder {
        pub fn new(format: &AudioFormat) -> Result<Self, EncodeError> {
            let rate = match format.sample_rate {
                8_000 => SampleRate::Hz8000,
                12_000 => SampleRate::Hz12000,
                16_000 => SampleRate::Hz16000,
                24_000 => SampleRate::Hz24000,
                48_000 => SampleRate::Hz48000,
                other => return Err(EncodeError::Unsupported(format!("opus sample rate {}", other))),
            };
            let channels = match format.channels {
                1 => Channels::Mono,
                2 => Channels::Stereo,
                other => return Err(EncodeError::Unsupported(format!("opus with {} channels", other))),
            };
            let inner = Encoder::new(rate, channels, Application::Audio)
                .map_err(|e| EncodeError::Codec(e.to_string()))?;

            Ok(Self {
                inner,
                samples: format.samples_per_frame(),
                out: vec![0u8; format.max_packet_bytes],
            })
        }
    }

    impl FrameEncoder for OpusEncoder {
        fn encode(&mut self, frame: &[i16]) -> Result<Bytes, EncodeError> {
            if frame.len() != self.samples {
                return Err(EncodeError::FrameSize {
                    expected: self.samples,
                    actual: frame.len(),
                });
            }
            let len = self
                .inner
                .encode(frame, &mut self.out)
                .map_err(|e| EncodeError::Codec(e.to_string()))?;
            Ok(Bytes::copy_from_slice(&self.out[..len]))
        }
    }
}

/// Picks the encoder named by `playback.codec`.
#[derive(Debug, Clone, Copy)]
pub struct CodecEncoderFactory {
    codec: Codec,
}

impl CodecEncoderFactory {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }
}

impl EncoderFactory for CodecEncoderFactory {
    fn create(&self, format: &AudioFormat) -> Result<Box<dyn FrameEncoder>, EncodeError> {
        match self.codec {
            Codec::Pcm => Ok(Box::new(PcmEncoder::new(format))),
            #[cfg(feature = "opus")]
            Codec::Opus => Ok(Box::new(OpusEncoder::new(format)?)),
            #[cfg(not(feature = "opus"))]
            Codec::Opus => Err(EncodeError::Unsupported(
                "opus support was not compiled in (enable the `opus` feature)".to_string(),
            )),
        }
    }
}
