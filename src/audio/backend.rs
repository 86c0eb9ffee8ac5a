use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Mean absolute sample magnitude, used as the silence metric.
    pub fn mean_magnitude(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.samples.iter().map(|s| s.unsigned_abs() as u64).sum();
        sum as f64 / self.samples.len() as f64
    }

    /// Wall-clock duration this frame covers.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        Duration::from_nanos(per_channel * 1_000_000_000 / self.sample_rate as u64)
    }

    /// Samples as little-endian PCM bytes, the wire and file representation.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Configuration for a capture stream
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device to read from (a synthetic source name)
    pub device: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Duration of each delivered frame
    pub chunk_duration: Duration,
}

impl CaptureConfig {
    /// Bytes per delivered chunk (s16le, interleaved).
    pub fn chunk_bytes(&self) -> usize {
        let frames = self.sample_rate as u64 * self.chunk_duration.as_millis() as u64 / 1000;
        (frames * self.channels as u64 * 2) as usize
    }
}

/// Audio capture backend trait
///
/// Implementations deliver fixed-size PCM frames over a channel until
/// stopped. `stop()` must wait for the capture task to exit before
/// returning, so no frame is produced after it completes.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and wait for the capture task to exit
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Creates capture backends routed at a named device.
///
/// The relay opens a fresh capture stream for every speaking turn, so it
/// needs a factory rather than a single backend instance.
pub trait CaptureBackendFactory: Send + Sync {
    fn create(&self, device: &str) -> Result<Box<dyn CaptureBackend>>;
}

/// PulseAudio capture backend
///
/// Reads raw s16le PCM from a `parec` child process attached to the given
/// source. The synthetic source taps the synthetic sink's monitor, so this
/// stream carries whatever the meeting plays into the sink.
pub struct PulseCaptureBackend {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PulseCaptureBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for PulseCaptureBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        info!(
            "Starting pulse capture on {} ({}Hz, {} channels)",
            self.config.device, self.config.sample_rate, self.config.channels
        );

        let mut child = Command::new("parec")
            .arg(format!("--device={}", self.config.device))
            .arg("--format=s16le")
            .arg(format!("--rate={}", self.config.sample_rate))
            .arg(format!("--channels={}", self.config.channels))
            .arg("--raw")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn parec")?;

        let mut stdout = child.stdout.take().context("parec stdout unavailable")?;

        let (tx, rx) = mpsc::channel(100);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let chunk_bytes = config.chunk_bytes();
            let mut buf = vec![0u8; chunk_bytes];
            let started = tokio::time::Instant::now();

            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                match stdout.read_exact(&mut buf).await {
                    Ok(_) => {
                        let samples = buf
                            .chunks_exact(2)
                            .map(|b| i16::from_le_bytes([b[0], b[1]]))
                            .collect();

                        let frame = AudioFrame {
                            samples,
                            sample_rate: config.sample_rate,
                            channels: config.channels,
                            timestamp_ms: started.elapsed().as_millis() as u64,
                        };

                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Capture stream ended: {}", e);
                        break;
                    }
                }
            }

            if let Err(e) = child.start_kill() {
                warn!("Failed to kill parec: {}", e);
            }
            let _ = child.wait().await;
        });

        self.task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.await.context("Capture task panicked")?;
        }

        info!("Pulse capture on {} stopped", self.config.device);

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some() && self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "pulse-parec"
    }
}

/// Factory for `parec`-backed capture streams with a fixed format.
pub struct PulseCaptureFactory {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_duration: Duration,
}

impl CaptureBackendFactory for PulseCaptureFactory {
    fn create(&self, device: &str) -> Result<Box<dyn CaptureBackend>> {
        Ok(Box::new(PulseCaptureBackend::new(CaptureConfig {
            device: device.to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            chunk_duration: self.chunk_duration,
        })))
    }
}
