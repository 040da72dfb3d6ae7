//! Decoded PCM sources.
//!
//! The production source is [`FfmpegDecoder`]: an ffmpeg subprocess that pulls
//! a remote URL (reconnecting on its own) and writes interleaved s16le PCM to
//! stdout. Its stderr is drained on a separate task so a chatty process can
//! never block on a full pipe.

use crate::types::AudioFormat;
use async_trait::async_trait;
use jamconf::DecoderConfig;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long shutdown waits for the stderr drain to see EOF after the process dies.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to spawn decoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("decoder process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("decoder exited with {status} before producing audio")]
    NoAudio { status: ExitStatus },

    #[error("failed reading decoded audio: {0}")]
    Read(#[source] io::Error),

    #[error("frame buffer holds {actual} samples, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
}

/// A stream of fixed-size PCM frames.
#[async_trait]
pub trait PcmSource: Send {
    /// Fill `frame` with exactly one frame of interleaved samples.
    ///
    /// Returns `Ok(false)` at end of stream; a trailing partial frame counts
    /// as end of stream and is discarded. A short read at EOF is therefore a
    /// clean finish, not a [`DecodeError::Read`].
    async fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool, DecodeError>;

    /// Release the source. Called once on every session exit path.
    async fn shutdown(&mut self);
}

/// Opens a fresh source per session.
pub trait SourceFactory: Send + Sync {
    fn open(&self, url: &str, format: &AudioFormat) -> Result<Box<dyn PcmSource>, DecodeError>;
}

/// Spawns [`FfmpegDecoder`]s from decoder config.
#[derive(Debug, Clone)]
pub struct FfmpegSourceFactory {
    config: DecoderConfig,
}

impl FfmpegSourceFactory {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }
}

impl SourceFactory for FfmpegSourceFactory {
    fn open(&self, url: &str, format: &AudioFormat) -> Result<Box<dyn PcmSource>, DecodeError> {
        Ok(Box::new(FfmpegDecoder::spawn(&self.config, url, format)?))
    }
}

/// Build the ffmpeg argument list for one stream.
pub fn ffmpeg_args(config: &DecoderConfig, url: &str, format: &AudioFormat) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into()];
    if config.reconnect {
        args.extend([
            "-reconnect".into(),
            "1".into(),
            "-reconnect_streamed".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            config.reconnect_delay_max_secs.to_string(),
        ]);
    }
    args.extend([
        "-i".into(),
        url.to_string(),
        "-vn".into(),
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        format.sample_rate.to_string(),
        "-ac".into(),
        format.channels.to_string(),
        "pipe:1".into(),
    ]);
    args
}

/// Supervised ffmpeg process producing s16le PCM.
pub struct FfmpegDecoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    bytes: Vec<u8>,
    frames_read: u64,
}

impl FfmpegDecoder {
    pub fn spawn(config: &DecoderConfig, url: &str, format: &AudioFormat) -> Result<Self, DecodeError> {
        let mut command = Command::new(&config.ffmpeg_path);
        command.args(ffmpeg_args(config, url, format));
        Self::from_command(command, &config.ffmpeg_path, config.read_buffer_bytes, format)
    }

    /// Start `command` with piped output and take ownership of the process.
    fn from_command(
        mut command: Command,
        program: &str,
        buffer_bytes: usize,
        format: &AudioFormat,
    ) -> Result<Self, DecodeError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(DecodeError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(DecodeError::MissingPipe("stderr"))?;

        debug!(pid = ?child.id(), %program, "spawned decoder");

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(buffer_bytes.max(format.bytes_per_frame()), stdout),
            stderr_task: Some(tokio::spawn(drain_stderr(stderr))),
            bytes: vec![0u8; format.bytes_per_frame()],
            frames_read: 0,
        })
    }

    /// A process that dies before its first frame failed to open the stream.
    async fn end_of_stream(&mut self) -> Result<bool, DecodeError> {
        if self.frames_read > 0 {
            return Ok(false);
        }
        match self.child.wait().await {
            Ok(status) if !status.success() => Err(DecodeError::NoAudio { status }),
            Ok(_) => Ok(false),
            Err(e) => Err(DecodeError::Read(e)),
        }
    }
}

#[async_trait]
impl PcmSource for FfmpegDecoder {
    async fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool, DecodeError> {
        if frame.len() * 2 != self.bytes.len() {
            return Err(DecodeError::FrameSize {
                expected: self.bytes.len() / 2,
                actual: frame.len(),
            });
        }

        match self.stdout.read_exact(&mut self.bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return self.end_of_stream().await,
            Err(e) => return Err(DecodeError::Read(e)),
        }

        for (sample, pair) in frame.iter_mut().zip(self.bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([pair[0], pair[1]]);
        }
        self.frames_read += 1;
        Ok(true)
    }

    async fn shutdown(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => debug!(%status, frames = self.frames_read, "decoder already exited"),
            _ => {
                if let Err(e) = self.child.start_kill() {
                    debug!(error = %e, "decoder kill failed");
                }
                match self.child.wait().await {
                    Ok(status) => debug!(%status, frames = self.frames_read, "decoder stopped"),
                    Err(e) => warn!(error = %e, "failed to reap decoder"),
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_GRACE, task).await.is_err() {
                debug!("stderr drain still running after decoder exit");
            }
        }
    }
}

/// Forward decoder diagnostics to tracing until the pipe closes.
async fn drain_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    debug!(target: "jamboree::ffmpeg", "{}", text);
                }
            }
            Err(e) => {
                debug!(error = %e, "decoder stderr closed");
                break;
            }
        }
    }
}
