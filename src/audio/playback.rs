use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use hound::WavReader;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{info, warn};

/// Renders PCM byte chunks to an output device.
///
/// `play` must write the chunk before returning so response audio reaches
/// the synthetic speaker with no buffering beyond what the device needs.
#[async_trait::async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Write one chunk of s16le PCM to the device
    async fn play(&mut self, pcm: &[u8]) -> Result<()>;

    /// Flush and release the device
    async fn close(&mut self) -> Result<()>;
}

/// Creates playback sinks routed at a named device.
pub trait PlaybackSinkFactory: Send + Sync {
    fn create(&self, device: &str) -> Box<dyn PlaybackSink>;
}

/// PulseAudio playback sink
///
/// Streams raw s16le PCM into a `pacat` child attached to the synthetic
/// sink. The child is spawned lazily on the first chunk so constructing a
/// sink never touches the device.
pub struct PulsePlaybackSink {
    device: String,
    sample_rate: u32,
    channels: u16,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl PulsePlaybackSink {
    pub fn new(device: &str, sample_rate: u32, channels: u16) -> Self {
        Self {
            device: device.to_string(),
            sample_rate,
            channels,
            child: None,
            stdin: None,
        }
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.stdin.is_some() {
            return Ok(());
        }

        info!(
            "Starting pulse playback on {} ({}Hz, {} channels)",
            self.device, self.sample_rate, self.channels
        );

        let mut child = Command::new("pacat")
            .arg(format!("--device={}", self.device))
            .arg("--format=s16le")
            .arg(format!("--rate={}", self.sample_rate))
            .arg(format!("--channels={}", self.channels))
            .arg("--raw")
            .stdin(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn pacat")?;

        self.stdin = Some(child.stdin.take().context("pacat stdin unavailable")?);
        self.child = Some(child);

        Ok(())
    }
}

#[async_trait::async_trait]
impl PlaybackSink for PulsePlaybackSink {
    async fn play(&mut self, pcm: &[u8]) -> Result<()> {
        self.ensure_started()?;

        let stdin = self.stdin.as_mut().context("pacat stdin unavailable")?;
        stdin
            .write_all(pcm)
            .await
            .context("Failed to write PCM to pacat")?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping stdin ends the stream; pacat exits after draining.
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.wait().await {
                warn!("pacat did not exit cleanly: {}", e);
            }
        }

        info!("Pulse playback on {} closed", self.device);

        Ok(())
    }
}

/// Factory for `pacat`-backed playback sinks with a fixed format.
pub struct PulsePlaybackFactory {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlaybackSinkFactory for PulsePlaybackFactory {
    fn create(&self, device: &str) -> Box<dyn PlaybackSink> {
        Box::new(PulsePlaybackSink::new(
            device,
            self.sample_rate,
            self.channels,
        ))
    }
}

/// Frames per write when streaming a file to a sink.
const FILE_STREAM_CHUNK_FRAMES: usize = 1024;

/// Stream a pre-recorded WAV file into a playback sink until exhausted or
/// the stop signal clears.
///
/// Used by the legacy join path to voice a canned greeting through the
/// synthetic speaker.
pub async fn stream_wav_file(
    path: impl AsRef<Path>,
    sink: &mut dyn PlaybackSink,
    running: &Arc<AtomicBool>,
) -> Result<()> {
    let path = path.as_ref();
    info!("Streaming {} to playback sink", path.display());

    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read audio samples")?;

    let chunk_samples = FILE_STREAM_CHUNK_FRAMES * spec.channels as usize;
    for chunk in samples.chunks(chunk_samples) {
        if !running.load(Ordering::SeqCst) {
            info!("Playback of {} cancelled", path.display());
            break;
        }

        let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
        sink.play(&bytes).await?;
    }

    sink.close().await?;

    info!("Playback of {} finished", path.display());

    Ok(())
}
