//! Meeting UI driver interface
//!
//! The browser automation that locates and clicks meeting-page controls is
//! an external collaborator behind this narrow interface. The orchestrator
//! treats every operation as potentially slow and potentially failing;
//! failures degrade to the nearest defined fallback state instead of
//! propagating raw errors.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use crate::devices::DeviceHandle;

/// Result of a join attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOutcome {
    /// Whether presence in the meeting was confirmed
    pub joined: bool,
}

/// Sampled indicator of whether the session should continue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LivenessSignal {
    /// Number of participants currently visible, including the bot
    pub participant_count: u32,
    /// Whether the bot still appears to be in the meeting
    pub in_meeting: bool,
}

/// Scripted meeting-page operations.
#[async_trait::async_trait]
pub trait MeetingUiDriver: Send + Sync {
    /// Run the join sequence for the given meeting target, selecting the
    /// synthetic devices from the handle in the pre-join media controls.
    /// `joined: false` means no join affordance was found or presence was
    /// never confirmed.
    async fn join(&self, target: &str, devices: &DeviceHandle) -> Result<JoinOutcome>;

    /// Sample participant presence.
    async fn sample_liveness(&self) -> Result<LivenessSignal>;

    /// Leave the meeting. Best-effort; the caller logs failures and moves on.
    async fn leave(&self) -> Result<()>;
}

/// UI driver backed by an external automation executable.
///
/// Each operation invokes the driver program with a subcommand and reads a
/// JSON document from its stdout. The program owns selectors, retries, and
/// everything else browser-specific.
pub struct ProcessUiDriver {
    program: String,
}

impl ProcessUiDriver {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run UI driver {}", self.program))?;

        if !output.status.success() {
            anyhow::bail!(
                "UI driver {} {} failed: {}",
                self.program,
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output.stdout)
    }

    async fn invoke<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T> {
        let stdout = self.run(args).await?;
        serde_json::from_slice(&stdout).context("Failed to parse UI driver output")
    }
}

#[async_trait::async_trait]
impl MeetingUiDriver for ProcessUiDriver {
    async fn join(&self, target: &str, devices: &DeviceHandle) -> Result<JoinOutcome> {
        info!("Joining {} via UI driver", target);

        self.invoke(&[
            "join",
            "--target",
            target,
            "--microphone",
            &devices.source_name,
            "--speaker",
            &devices.sink_name,
        ])
        .await
    }

    async fn sample_liveness(&self) -> Result<LivenessSignal> {
        self.invoke(&["liveness"]).await
    }

    async fn leave(&self) -> Result<()> {
        info!("Leaving meeting via UI driver");

        self.run(&["leave"]).await?;
        Ok(())
    }
}
