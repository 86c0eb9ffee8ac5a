use std::fmt;

use anyhow::Result;
use serde::Deserialize;

/// Bearer credential for the realtime speech service.
///
/// Supplied out of band (environment), never part of the config file, and
/// redacted from all Debug output.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn reveal(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub meeting: MeetingConfig,
    pub audio: AudioConfig,
    pub realtime: RealtimeServiceConfig,
    pub devices: DevicesConfig,
    pub session: SessionPolicyConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "meet-bridge".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MeetingConfig {
    /// External UI automation executable
    pub driver_bin: String,
    /// Pre-recorded greeting streamed to the synthetic speaker after join
    pub greeting_path: Option<String>,
}

impl Default for MeetingConfig {
    fn default() -> Self {
        Self {
            driver_bin: "meet-ui-driver".to_string(),
            greeting_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub recordings_path: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            recordings_path: "recordings".to_string(),
            sample_rate: 44100,
            channels: 2,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RealtimeServiceConfig {
    pub endpoint: String,
    pub voice: String,
    pub instructions: String,
    pub transcription_model: String,
    /// Sample rate of the duplex audio, both directions
    pub sample_rate: u32,
    /// Outbound chunk duration in milliseconds
    pub chunk_duration_ms: u64,
    /// Mean absolute magnitude below which a chunk counts as silent
    pub silence_threshold: f64,
    /// Seconds of sustained silence that end the local speaking turn
    pub silence_duration_secs: u64,
}

impl Default for RealtimeServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            instructions: "You are a helpful assistant attending a meeting.".to_string(),
            transcription_model: "whisper-1".to_string(),
            sample_rate: 24000,
            chunk_duration_ms: 2000,
            silence_threshold: 1000.0,
            silence_duration_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub sink_name: String,
    pub source_name: String,
    /// Whether to create the video loopback device
    pub video: bool,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            sink_name: "virtual_speaker".to_string(),
            source_name: "virtual_mic".to_string(),
            video: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionPolicyConfig {
    /// Seconds between liveness samples
    pub poll_interval_secs: u64,
    /// One-time wait before concluding the meeting is empty at session start
    pub grace_period_secs: u64,
}

impl Default for SessionPolicyConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            grace_period_secs: 300,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("MEET_BRIDGE").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
