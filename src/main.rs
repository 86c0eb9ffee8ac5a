use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meet_bridge::{
    Config, Credential, DeviceManager, DeviceNames, Orchestrator, ProcessUiDriver,
    PulseCaptureFactory, PulseDeviceProvider, PulsePlaybackFactory, RealtimeRelay, RelayConfig,
    SessionConfig, TurnPolicy,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "meet-bridge",
    about = "Unattended meeting participant bridging live audio to a realtime speech service"
)]
struct Cli {
    /// Meeting URL to join
    meeting_url: String,

    /// Config file (TOML), merged over built-in defaults
    #[arg(long, default_value = "config/meet-bridge")]
    config: String,

    /// Pre-recorded WAV greeting to play after joining
    #[arg(long)]
    greeting: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let credential = Credential::new(
        std::env::var("MEET_BRIDGE_API_KEY").context("MEET_BRIDGE_API_KEY must be set")?,
    );

    let mut session_config =
        SessionConfig::new(&cli.meeting_url, &cfg.realtime.endpoint, credential.clone())?;
    session_config.output_dir = PathBuf::from(&cfg.audio.recordings_path);
    session_config.sample_rate = cfg.audio.sample_rate;
    session_config.channels = cfg.audio.channels;
    session_config.poll_interval = Duration::from_secs(cfg.session.poll_interval_secs);
    session_config.grace_period = Duration::from_secs(cfg.session.grace_period_secs);
    session_config.greeting_path = cli
        .greeting
        .or_else(|| cfg.meeting.greeting_path.as_ref().map(PathBuf::from));

    let devices = DeviceManager::new(
        Box::new(PulseDeviceProvider),
        DeviceNames {
            sink: cfg.devices.sink_name.clone(),
            source: cfg.devices.source_name.clone(),
        },
        cfg.devices.video,
    );

    let driver = Box::new(ProcessUiDriver::new(&cfg.meeting.driver_bin));

    let relay = RealtimeRelay::new(
        RelayConfig {
            endpoint: cfg.realtime.endpoint.clone(),
            credential,
            voice: cfg.realtime.voice.clone(),
            instructions: cfg.realtime.instructions.clone(),
            transcription_model: cfg.realtime.transcription_model.clone(),
            turn: TurnPolicy {
                silence_threshold: cfg.realtime.silence_threshold,
                silence_duration: Duration::from_secs(cfg.realtime.silence_duration_secs),
            },
        },
        Arc::new(PulseCaptureFactory {
            sample_rate: cfg.realtime.sample_rate,
            channels: 1,
            chunk_duration: Duration::from_millis(cfg.realtime.chunk_duration_ms),
        }),
    );

    let recorder_factory = Arc::new(PulseCaptureFactory {
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
        chunk_duration: Duration::from_millis(100),
    });
    let playback_factory = Arc::new(PulsePlaybackFactory {
        sample_rate: cfg.realtime.sample_rate,
        channels: 1,
    });

    let orchestrator = Orchestrator::new(
        session_config,
        devices,
        driver,
        relay,
        recorder_factory,
        playback_factory,
    );

    let summary = orchestrator.run().await?;

    info!(
        "Session {} finished: {:?} ({} liveness samples, {:.1}s)",
        summary.session_id,
        summary.outcome,
        summary.liveness_samples,
        summary.duration_secs()
    );

    Ok(())
}
