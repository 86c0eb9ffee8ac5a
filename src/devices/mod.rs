//! Virtual device lifecycle management
//!
//! Creates and destroys the synthetic audio sink/source pair and the
//! synthetic video device the bot presents to the meeting in place of real
//! hardware. Setup is a strict two-step sequence (sink before source, since
//! the source taps the sink's monitor); teardown runs in reverse and is
//! always best-effort.

use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Errors from device provider commands.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("video loopback device not found after module load")]
    VideoDeviceNotFound,
}

/// Opaque identifiers for the synthetic devices of one session.
///
/// Created by [`DeviceManager::setup`], passed by reference to every
/// component that routes through the devices, destroyed by
/// [`DeviceManager::teardown`]. Routing is always through this handle,
/// never through process environment.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    /// Synthetic sink the meeting plays into
    pub sink_name: String,
    /// Synthetic source tapping the sink's monitor
    pub source_name: String,
    /// PulseAudio module id of the sink, when the provider reported one
    pub sink_module: Option<u32>,
    /// PulseAudio module id of the source, when the provider reported one
    pub source_module: Option<u32>,
    /// Path of the video loopback device, when one was created
    pub video_device: Option<PathBuf>,
}

impl DeviceHandle {
    /// A handle carrying only names, used for stale-device cleanup before
    /// the modules of this run exist.
    fn named(sink_name: &str, source_name: &str) -> Self {
        Self {
            sink_name: sink_name.to_string(),
            source_name: source_name.to_string(),
            sink_module: None,
            source_module: None,
            video_device: None,
        }
    }
}

/// External device provider commands.
///
/// Creation returns module identifiers where the underlying tool reports
/// them; removal is best-effort and must log rather than raise, so a
/// partially failed teardown still releases everything it can.
#[async_trait::async_trait]
pub trait VirtualDeviceProvider: Send + Sync {
    /// Create the audio loopback pair: sink first, then the source tapping
    /// its monitor. Returns (sink module id, source module id).
    async fn create_audio_pair(
        &self,
        sink_name: &str,
        source_name: &str,
    ) -> Result<(Option<u32>, Option<u32>), DeviceError>;

    /// Remove the audio loopback pair (source first, then sink). Best-effort.
    async fn remove_audio_pair(&self, handle: &DeviceHandle);

    /// Create the video loopback device and resolve its path.
    async fn create_video_device(&self) -> Result<PathBuf, DeviceError>;

    /// Remove the video loopback device. Best-effort.
    async fn remove_video_device(&self);
}

/// Device naming for one session.
#[derive(Debug, Clone)]
pub struct DeviceNames {
    pub sink: String,
    pub source: String,
}

impl Default for DeviceNames {
    fn default() -> Self {
        Self {
            sink: "virtual_speaker".to_string(),
            source: "virtual_mic".to_string(),
        }
    }
}

/// Owns setup/teardown ordering for the process-wide synthetic devices.
///
/// Setup must complete before any pipeline references the devices; teardown
/// runs after every pipeline has released them. Both are safely repeatable:
/// a stale device pair left by a crashed run is removed before creation.
pub struct DeviceManager {
    provider: Box<dyn VirtualDeviceProvider>,
    names: DeviceNames,
    video: bool,
}

impl DeviceManager {
    pub fn new(provider: Box<dyn VirtualDeviceProvider>, names: DeviceNames, video: bool) -> Self {
        Self {
            provider,
            names,
            video,
        }
    }

    /// Create the synthetic devices: audio sink, tapped source, then the
    /// video loopback when enabled. A failure after partial creation
    /// releases what was created before returning the error.
    pub async fn setup(&self) -> Result<DeviceHandle, DeviceError> {
        info!(
            "Setting up virtual devices (sink={}, source={})",
            self.names.sink, self.names.source
        );

        // A stale pair from a crashed run must not block this one.
        self.provider
            .remove_audio_pair(&DeviceHandle::named(&self.names.sink, &self.names.source))
            .await;

        let (sink_module, source_module) = self
            .provider
            .create_audio_pair(&self.names.sink, &self.names.source)
            .await?;

        let mut handle = DeviceHandle {
            sink_name: self.names.sink.clone(),
            source_name: self.names.source.clone(),
            sink_module,
            source_module,
            video_device: None,
        };

        if self.video {
            match self.provider.create_video_device().await {
                Ok(path) => {
                    info!("Video loopback device at {}", path.display());
                    handle.video_device = Some(path);
                }
                Err(e) => {
                    self.provider.remove_audio_pair(&handle).await;
                    return Err(e);
                }
            }
        }

        info!("Virtual devices ready");

        Ok(handle)
    }

    /// Destroy the synthetic devices in reverse creation order. Never
    /// raises; safe to call with a handle from a partially failed setup.
    pub async fn teardown(&self, handle: &DeviceHandle) {
        info!("Tearing down virtual devices");

        if handle.video_device.is_some() {
            self.provider.remove_video_device().await;
        }

        self.provider.remove_audio_pair(handle).await;

        info!("Virtual devices released");
    }
}

/// Label v4l2loopback registers the synthetic camera under.
const VIDEO_CARD_LABEL: &str = "MeetBridgeCam";

/// PulseAudio + v4l2loopback device provider
///
/// Shells out to `pactl` for the audio pair and `modprobe`/`v4l2-ctl` for
/// the video loopback. Module ids parsed from `pactl` stdout allow precise
/// unload; unload by module name is the fallback for stale devices.
pub struct PulseDeviceProvider;

impl PulseDeviceProvider {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, DeviceError> {
        let rendered = format!("{} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| DeviceError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeviceError::CommandFailed {
                command: rendered,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn unload_module(&self, id: Option<u32>, module_name: &str) {
        let result = match id {
            Some(id) => self.run("pactl", &["unload-module", &id.to_string()]).await,
            None => self.run("pactl", &["unload-module", module_name]).await,
        };

        if let Err(e) = result {
            warn!("Failed to unload {}: {}", module_name, e);
        }
    }
}

/// Parse a module id from `pactl load-module` stdout.
fn parse_module_id(stdout: &str) -> Option<u32> {
    stdout.trim().parse().ok()
}

/// Find the device path v4l2loopback registered, from `v4l2-ctl
/// --list-devices` output: the card label line is followed by indented
/// `/dev/videoN` lines.
fn parse_video_device(listing: &str, label: &str) -> Option<PathBuf> {
    let mut in_card = false;
    for line in listing.lines() {
        if line.contains(label) {
            in_card = true;
            continue;
        }
        if in_card {
            let trimmed = line.trim();
            if trimmed.starts_with("/dev/video") {
                return Some(PathBuf::from(trimmed));
            }
            if !line.starts_with(char::is_whitespace) {
                in_card = false;
            }
        }
    }
    None
}

#[async_trait::async_trait]
impl VirtualDeviceProvider for PulseDeviceProvider {
    async fn create_audio_pair(
        &self,
        sink_name: &str,
        source_name: &str,
    ) -> Result<(Option<u32>, Option<u32>), DeviceError> {
        info!("Loading virtual speaker {}", sink_name);

        let out = self
            .run(
                "pactl",
                &[
                    "load-module",
                    "module-null-sink",
                    &format!("sink_name={}", sink_name),
                    &format!("sink_properties=device.description=\"{}\"", sink_name),
                ],
            )
            .await?;
        let sink_module = parse_module_id(&out);

        info!("Loading virtual microphone {}", source_name);

        let source_result = self
            .run(
                "pactl",
                &[
                    "load-module",
                    "module-remap-source",
                    &format!("master={}.monitor", sink_name),
                    &format!("source_name={}", source_name),
                    &format!("source_properties=device.description=\"{}\"", source_name),
                ],
            )
            .await;

        match source_result {
            Ok(out) => Ok((sink_module, parse_module_id(&out))),
            Err(e) => {
                // The source depends on the sink; a half-created pair is
                // useless, so release the sink before reporting.
                self.unload_module(sink_module, "module-null-sink").await;
                Err(e)
            }
        }
    }

    async fn remove_audio_pair(&self, handle: &DeviceHandle) {
        self.unload_module(handle.source_module, "module-remap-source")
            .await;
        self.unload_module(handle.sink_module, "module-null-sink")
            .await;
    }

    async fn create_video_device(&self) -> Result<PathBuf, DeviceError> {
        info!("Loading video loopback module");

        self.run(
            "modprobe",
            &[
                "v4l2loopback",
                "video_nr=10",
                &format!("card_label=\"{}\"", VIDEO_CARD_LABEL),
                "exclusive_caps=1",
            ],
        )
        .await?;

        let listing = self.run("v4l2-ctl", &["--list-devices"]).await?;

        parse_video_device(&listing, VIDEO_CARD_LABEL).ok_or(DeviceError::VideoDeviceNotFound)
    }

    async fn remove_video_device(&self) {
        if let Err(e) = self.run("modprobe", &["--force", "-r", "v4l2loopback"]).await {
            warn!("Failed to remove video loopback module: {}", e);
        }
    }
}
