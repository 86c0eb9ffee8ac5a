use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::summary::{SessionOutcome, SessionState, SessionSummary};
use crate::audio::{
    stream_wav_file, CaptureBackend, CaptureBackendFactory, PlaybackSinkFactory, RecorderConfig,
    WavRecorder,
};
use crate::devices::{DeviceHandle, DeviceManager};
use crate::driver::MeetingUiDriver;
use crate::relay::RealtimeRelay;

/// Handles for the pipelines started in the meeting.
///
/// Every handle exists, as not-started, before any branch that might skip
/// starting it, so the teardown path can always check-before-cancel.
struct PipelineHandles {
    recorder_backend: Option<Box<dyn CaptureBackend>>,
    recorder_task: Option<JoinHandle<()>>,
    playback_task: Option<JoinHandle<()>>,
}

impl PipelineHandles {
    fn not_started() -> Self {
        Self {
            recorder_backend: None,
            recorder_task: None,
            playback_task: None,
        }
    }
}

/// Session orchestrator
///
/// Owns the join/monitor/leave state machine: device setup, the UI join
/// sequence, concurrent pipeline startup, liveness polling, and a teardown
/// sequence that runs exactly once on every exit path. Pipeline and driver
/// failures are reported and degrade to the nearest defined fallback;
/// only device setup failure is fatal.
pub struct Orchestrator {
    config: SessionConfig,
    devices: DeviceManager,
    driver: Box<dyn MeetingUiDriver>,
    relay: RealtimeRelay,
    recorder_factory: Arc<dyn CaptureBackendFactory>,
    playback_factory: Arc<dyn PlaybackSinkFactory>,
    state: SessionState,
    playback_running: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: SessionConfig,
        devices: DeviceManager,
        driver: Box<dyn MeetingUiDriver>,
        relay: RealtimeRelay,
        recorder_factory: Arc<dyn CaptureBackendFactory>,
        playback_factory: Arc<dyn PlaybackSinkFactory>,
    ) -> Self {
        Self {
            config,
            devices,
            driver,
            relay,
            recorder_factory,
            playback_factory,
            state: SessionState::Idle,
            playback_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion.
    ///
    /// Always reaches `Terminated` and releases the devices; the only
    /// error this returns is a fatal device setup failure, which aborts
    /// before any join or pipeline action.
    pub async fn run(mut self) -> Result<SessionSummary> {
        let started_at = Utc::now();

        info!(
            "Starting session {} for {}",
            self.config.session_id, self.config.meeting_url
        );

        let handle = match self.devices.setup().await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Device setup failed: {}", e);
                self.state = SessionState::Terminated;
                return Err(anyhow::Error::new(e).context("fatal device setup failure"));
            }
        };
        self.state = SessionState::DevicesReady;

        let mut pipelines = PipelineHandles::not_started();
        let mut recorder_started = false;
        let mut relay_started = false;

        self.state = SessionState::Joining;
        let joined = match self.driver.join(&self.config.meeting_url, &handle).await {
            Ok(outcome) if outcome.joined => true,
            Ok(_) => {
                warn!("No join affordance found or presence not confirmed");
                false
            }
            Err(e) => {
                warn!("Join attempt failed: {}", e);
                false
            }
        };

        let (outcome, went_active, liveness_samples) = if joined {
            self.state = SessionState::InMeeting;
            info!("Joined meeting; starting pipelines");

            recorder_started = match self.start_recorder(&handle, &mut pipelines).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Recorder pipeline failed to start: {}", e);
                    false
                }
            };

            let playback = self.playback_factory.create(&handle.sink_name);
            relay_started = match self.relay.start(&handle.source_name, playback).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Realtime relay failed to start: {}", e);
                    false
                }
            };

            self.start_greeting(&handle, &mut pipelines);

            self.monitor_liveness().await
        } else {
            (SessionOutcome::JoinFailed, false, 0)
        };

        self.state = SessionState::Leaving;
        info!("Leaving session ({:?})", outcome);

        // Pipelines wind down completely before the UI leave action, and
        // the leave action before device teardown.
        self.stop_pipelines(&mut pipelines).await;
        let relay_failed = self.relay.failed();
        self.relay.stop().await;

        if let Err(e) = self.driver.leave().await {
            warn!("Leave action failed: {}", e);
        }

        self.devices.teardown(&handle).await;
        self.state = SessionState::Terminated;

        let ended_at = Utc::now();
        info!(
            "Session {} terminated after {:.1}s",
            self.config.session_id,
            (ended_at - started_at).num_milliseconds() as f64 / 1000.0
        );

        Ok(SessionSummary {
            session_id: self.config.session_id.clone(),
            final_state: self.state,
            outcome,
            went_active,
            recorder_started,
            relay_started,
            relay_failed,
            liveness_samples,
            started_at,
            ended_at,
        })
    }

    /// Poll participant presence until the session should leave.
    ///
    /// A single grace period applies at session start, distinguishing "the
    /// bot arrived before others" from "the bot is alone after others
    /// left". Once a second participant has been seen, the first lone
    /// observation leaves immediately.
    async fn monitor_liveness(&mut self) -> (SessionOutcome, bool, usize) {
        let mut went_active = false;
        let mut grace_used = false;
        let mut samples = 0usize;

        loop {
            let count = match self.driver.sample_liveness().await {
                Ok(signal) if signal.in_meeting => signal.participant_count,
                Ok(_) => {
                    warn!("No longer present in meeting");
                    0
                }
                Err(e) => {
                    // Conservative: an unobservable meeting is an empty one.
                    warn!("Liveness sampling failed: {}", e);
                    0
                }
            };
            samples += 1;
            debug!("Participant count: {}", count);

            if count <= 1 {
                if went_active {
                    info!("Participant count dropped to {}; leaving", count);
                    return (SessionOutcome::LivenessLost, went_active, samples);
                }
                if grace_used {
                    info!("Meeting still empty after grace period; leaving");
                    return (SessionOutcome::MeetingEmpty, went_active, samples);
                }

                grace_used = true;
                info!(
                    "Alone in meeting; waiting {:.0}s grace period",
                    self.config.grace_period.as_secs_f64()
                );
                tokio::time::sleep(self.config.grace_period).await;
                continue;
            }

            went_active = true;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn start_recorder(
        &self,
        handle: &DeviceHandle,
        pipelines: &mut PipelineHandles,
    ) -> Result<()> {
        let mut backend = self
            .recorder_factory
            .create(&handle.source_name)
            .context("Failed to create recorder capture backend")?;
        let frames = backend.start().await.context("Failed to start capture")?;

        let recorder = WavRecorder::new(RecorderConfig {
            output_dir: self.config.output_dir.clone(),
            session_id: self.config.session_id.clone(),
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        })?;

        let task = tokio::spawn(async move {
            if let Err(e) = recorder.record(frames).await {
                error!("Recorder pipeline failed: {}", e);
            }
        });

        pipelines.recorder_backend = Some(backend);
        pipelines.recorder_task = Some(task);

        Ok(())
    }

    fn start_greeting(&self, handle: &DeviceHandle, pipelines: &mut PipelineHandles) {
        let Some(path) = self.config.greeting_path.clone() else {
            return;
        };

        let mut sink = self.playback_factory.create(&handle.sink_name);
        self.playback_running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.playback_running);

        pipelines.playback_task = Some(tokio::spawn(async move {
            if let Err(e) = stream_wav_file(&path, sink.as_mut(), &running).await {
                warn!("Greeting playback failed: {}", e);
            }
        }));
    }

    /// Signal every pipeline to stop, then wait for each task to actually
    /// exit so nothing touches the devices after teardown.
    async fn stop_pipelines(&mut self, pipelines: &mut PipelineHandles) {
        self.playback_running.store(false, Ordering::SeqCst);
        if let Some(task) = pipelines.playback_task.take() {
            if let Err(e) = task.await {
                error!("Playback task panicked: {}", e);
            }
        }

        // Stopping the backend closes the frame channel; the recorder
        // drains it and finalizes the file before its task completes.
        if let Some(mut backend) = pipelines.recorder_backend.take() {
            if let Err(e) = backend.stop().await {
                warn!("Failed to stop recorder capture: {}", e);
            }
        }
        if let Some(task) = pipelines.recorder_task.take() {
            if let Err(e) = task.await {
                error!("Recorder task panicked: {}", e);
            }
        }
    }
}
