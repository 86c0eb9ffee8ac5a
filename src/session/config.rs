use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::Credential;

/// Configuration for one meeting session
///
/// Immutable once constructed; `new` validates the required fields so a
/// session can never start with an empty target, endpoint, or credential.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "meeting-<uuid>")
    pub session_id: String,

    /// Meeting target the UI driver joins
    pub meeting_url: String,

    /// Realtime speech service endpoint
    pub endpoint: String,

    /// Bearer credential for the realtime service (never logged)
    pub credential: Credential,

    /// Pre-recorded greeting streamed to the synthetic speaker after join
    pub greeting_path: Option<PathBuf>,

    /// Directory the meeting recording lands in
    pub output_dir: PathBuf,

    /// Recording sample rate
    pub sample_rate: u32,

    /// Recording channel count (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Interval between liveness samples
    pub poll_interval: Duration,

    /// One-time wait before concluding the meeting is empty at session start
    pub grace_period: Duration,
}

impl SessionConfig {
    pub fn new(meeting_url: &str, endpoint: &str, credential: Credential) -> Result<Self> {
        if meeting_url.trim().is_empty() {
            bail!("meeting target must not be empty");
        }
        if endpoint.trim().is_empty() {
            bail!("realtime endpoint must not be empty");
        }
        if credential.is_empty() {
            bail!("realtime credential must not be empty");
        }

        Ok(Self {
            session_id: format!("meeting-{}", uuid::Uuid::new_v4()),
            meeting_url: meeting_url.to_string(),
            endpoint: endpoint.to_string(),
            credential,
            greeting_path: None,
            output_dir: PathBuf::from("recordings"),
            sample_rate: 44100,
            channels: 2,
            poll_interval: Duration::from_secs(10),
            grace_period: Duration::from_secs(300),
        })
    }
}
