use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::backend::AudioFrame;

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Output directory for the recording
    pub output_dir: PathBuf,
    /// Session ID (used for the recording filename)
    pub session_id: String,
    /// Sample rate of the recording
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
}

/// Metadata for a finished recording
#[derive(Debug, Clone)]
pub struct RecordingMetadata {
    /// File path of the recording
    pub file_path: PathBuf,
    /// Sample rate
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Number of samples written
    pub sample_count: usize,
    /// End timestamp of the last frame, milliseconds since capture start
    pub end_ms: u64,
}

/// WAV recorder
///
/// Consumes audio frames from a capture channel and writes a single 16-bit
/// WAV recording. The file is finalized only after the channel closes, which
/// happens when the capture task has exited, so every delivered frame lands
/// in the file and nothing is written after the header is sealed.
pub struct WavRecorder {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    metadata: RecordingMetadata,
}

impl WavRecorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir).context("Failed to create output directory")?;

        let file_path = config
            .output_dir
            .join(format!("{}.wav", config.session_id));

        let spec = hound::WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&file_path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", file_path))?;

        info!("Recording to {}", file_path.display());

        Ok(Self {
            writer: Some(writer),
            metadata: RecordingMetadata {
                file_path,
                sample_rate: config.sample_rate,
                channels: config.channels,
                sample_count: 0,
                end_ms: 0,
            },
        })
    }

    /// Consume frames until the channel closes, then finalize the file.
    pub async fn record(
        mut self,
        mut audio_rx: mpsc::Receiver<AudioFrame>,
    ) -> Result<RecordingMetadata> {
        info!("Recording started");

        while let Some(frame) = audio_rx.recv().await {
            self.write_frame(&frame)?;
        }

        let metadata = self.finish()?;

        info!(
            "Recording saved: {} ({} samples, {:.1}s)",
            metadata.file_path.display(),
            metadata.sample_count,
            metadata.end_ms as f64 / 1000.0
        );

        Ok(metadata)
    }

    fn write_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }

            self.metadata.end_ms = frame.timestamp_ms;
            self.metadata.sample_count += frame.samples.len();
        }

        Ok(())
    }

    fn finish(mut self) -> Result<RecordingMetadata> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        Ok(self.metadata.clone())
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
