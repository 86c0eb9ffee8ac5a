// Integration tests for the session orchestrator state machine
//
// These drive a full session against mock collaborators and verify the
// liveness policy, the teardown ordering, and every failure path.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use meet_bridge::{
    AudioFrame, CaptureBackend, CaptureBackendFactory, Credential, DeviceError, DeviceHandle,
    DeviceManager, DeviceNames, JoinOutcome, LivenessSignal, MeetingUiDriver, Orchestrator,
    PlaybackSink, PlaybackSinkFactory, RealtimeRelay, RelayConfig, SessionConfig, SessionOutcome,
    SessionState, TurnPolicy, VirtualDeviceProvider,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared, ordered log of operations across all mock collaborators.
#[derive(Clone, Default)]
struct OpsLog(Arc<Mutex<Vec<String>>>);

impl OpsLog {
    fn push(&self, op: &str) {
        self.0.lock().unwrap().push(op.to_string());
    }

    fn ops(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| o.as_str() == op).count()
    }

    fn position(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }
}

struct MockProvider {
    log: OpsLog,
    fail_audio: bool,
}

#[async_trait::async_trait]
impl VirtualDeviceProvider for MockProvider {
    async fn create_audio_pair(
        &self,
        _sink: &str,
        _source: &str,
    ) -> Result<(Option<u32>, Option<u32>), DeviceError> {
        self.log.push("create_audio_pair");
        if self.fail_audio {
            return Err(DeviceError::CommandFailed {
                command: "pactl load-module module-null-sink".to_string(),
                status: 1,
                stderr: "Module initialization failed".to_string(),
            });
        }
        Ok((Some(1), Some(2)))
    }

    async fn remove_audio_pair(&self, _handle: &DeviceHandle) {
        self.log.push("remove_audio_pair");
    }

    async fn create_video_device(&self) -> Result<PathBuf, DeviceError> {
        self.log.push("create_video_device");
        Ok(PathBuf::from("/dev/video10"))
    }

    async fn remove_video_device(&self) {
        self.log.push("remove_video_device");
    }
}

struct MockDriver {
    log: OpsLog,
    join_joined: bool,
    join_fails: bool,
    liveness_fails: bool,
    liveness: Mutex<VecDeque<u32>>,
}

impl MockDriver {
    fn with_liveness(log: OpsLog, samples: &[u32]) -> Self {
        Self {
            log,
            join_joined: true,
            join_fails: false,
            liveness_fails: false,
            liveness: Mutex::new(samples.iter().copied().collect()),
        }
    }
}

#[async_trait::async_trait]
impl MeetingUiDriver for MockDriver {
    async fn join(&self, _target: &str, _devices: &DeviceHandle) -> Result<JoinOutcome> {
        self.log.push("join");
        if self.join_fails {
            anyhow::bail!("selector not found");
        }
        Ok(JoinOutcome {
            joined: self.join_joined,
        })
    }

    async fn sample_liveness(&self) -> Result<LivenessSignal> {
        self.log.push("sample_liveness");
        if self.liveness_fails {
            anyhow::bail!("participant panel unavailable");
        }
        let count = self.liveness.lock().unwrap().pop_front().unwrap_or(0);
        Ok(LivenessSignal {
            participant_count: count,
            in_meeting: true,
        })
    }

    async fn leave(&self) -> Result<()> {
        self.log.push("leave");
        Ok(())
    }
}

/// Capture backend emitting small silent frames until stopped.
struct MockCapture {
    log: OpsLog,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl CaptureBackend for MockCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        self.log.push("capture_start");
        let (tx, rx) = mpsc::channel(100);
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        self.task = Some(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let frame = AudioFrame {
                    samples: vec![0; 441],
                    sample_rate: 44100,
                    channels: 1,
                    timestamp_ms: 0,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }));
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.await?;
        }
        self.log.push("capture_stop");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockCaptureFactory {
    log: OpsLog,
}

impl CaptureBackendFactory for MockCaptureFactory {
    fn create(&self, _device: &str) -> Result<Box<dyn CaptureBackend>> {
        Ok(Box::new(MockCapture {
            log: self.log.clone(),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }))
    }
}

struct NullSink;

#[async_trait::async_trait]
impl PlaybackSink for NullSink {
    async fn play(&mut self, _pcm: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct NullSinkFactory;

impl PlaybackSinkFactory for NullSinkFactory {
    fn create(&self, _device: &str) -> Box<dyn PlaybackSink> {
        Box::new(NullSink)
    }
}

/// Unreachable endpoint: the relay start fails fast and non-fatally.
const DEAD_ENDPOINT: &str = "ws://127.0.0.1:9";

fn build_orchestrator(
    driver: MockDriver,
    provider: MockProvider,
    log: &OpsLog,
    output_dir: &std::path::Path,
) -> Orchestrator {
    let mut config =
        SessionConfig::new("https://meet.example/abc", DEAD_ENDPOINT, Credential::new("test-key"))
            .unwrap();
    config.poll_interval = Duration::from_millis(10);
    config.grace_period = Duration::from_millis(50);
    config.output_dir = output_dir.to_path_buf();

    let devices = DeviceManager::new(Box::new(provider), DeviceNames::default(), false);

    let relay = RealtimeRelay::new(
        RelayConfig {
            endpoint: DEAD_ENDPOINT.to_string(),
            credential: Credential::new("test-key"),
            voice: "alloy".to_string(),
            instructions: "Be helpful.".to_string(),
            transcription_model: "whisper-1".to_string(),
            turn: TurnPolicy::default(),
        },
        Arc::new(MockCaptureFactory { log: log.clone() }),
    );

    Orchestrator::new(
        config,
        devices,
        Box::new(driver),
        relay,
        Arc::new(MockCaptureFactory { log: log.clone() }),
        Arc::new(NullSinkFactory),
    )
}

#[tokio::test]
async fn scenario_a_empty_meeting_after_grace_leaves_without_going_active() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let driver = MockDriver::with_liveness(log.clone(), &[1, 1]);
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.final_state, SessionState::Terminated);
    assert_eq!(summary.outcome, SessionOutcome::MeetingEmpty);
    assert!(!summary.went_active);
    assert_eq!(summary.liveness_samples, 2);
    assert_eq!(log.count("leave"), 1);
}

#[tokio::test]
async fn scenario_b_grace_then_growth_keeps_session_active() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    // Alone at first, then a second participant arrives within the grace
    // period; the session goes active and leaves only when they depart.
    let driver = MockDriver::with_liveness(log.clone(), &[1, 2, 2, 1]);
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.outcome, SessionOutcome::LivenessLost);
    assert!(summary.went_active);
    assert!(summary.recorder_started);
    // The relay endpoint is unreachable; its failure must not be fatal.
    assert!(!summary.relay_started);
    assert_eq!(summary.liveness_samples, 4);
}

#[tokio::test]
async fn scenario_c_drop_while_active_leaves_immediately_without_grace() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let driver = MockDriver::with_liveness(log.clone(), &[2, 2, 1]);
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());

    let summary = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("session should leave without waiting for any grace period")
        .unwrap();

    assert_eq!(summary.outcome, SessionOutcome::LivenessLost);
    assert!(summary.went_active);
    assert_eq!(summary.liveness_samples, 3);
}

#[tokio::test]
async fn scenario_d_setup_failure_aborts_before_any_join_action() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let driver = MockDriver::with_liveness(log.clone(), &[2, 1]);
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: true,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let result = orchestrator.run().await;

    assert!(result.is_err());
    let ops = log.ops();
    assert!(!ops.contains(&"join".to_string()));
    assert!(!ops.contains(&"leave".to_string()));
    assert!(!ops.contains(&"capture_start".to_string()));
}

#[tokio::test]
async fn join_failure_still_runs_full_teardown() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let mut driver = MockDriver::with_liveness(log.clone(), &[]);
    driver.join_joined = false;
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.outcome, SessionOutcome::JoinFailed);
    assert_eq!(summary.final_state, SessionState::Terminated);
    assert!(!summary.recorder_started);
    let ops = log.ops();
    // No pipeline ever started, but the leave/teardown sequence still ran.
    assert!(!ops.contains(&"capture_start".to_string()));
    assert_eq!(log.count("leave"), 1);
    // Stale cleanup during setup plus the final teardown.
    assert_eq!(log.count("remove_audio_pair"), 2);
}

#[tokio::test]
async fn join_error_is_treated_as_join_failure() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let mut driver = MockDriver::with_liveness(log.clone(), &[]);
    driver.join_fails = true;
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.outcome, SessionOutcome::JoinFailed);
    assert_eq!(summary.final_state, SessionState::Terminated);
    assert_eq!(log.count("remove_audio_pair"), 2);
}

#[tokio::test]
async fn liveness_sampling_failure_conservatively_leaves() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let mut driver = MockDriver::with_liveness(log.clone(), &[]);
    driver.liveness_fails = true;
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let summary = orchestrator.run().await.unwrap();

    // An unobservable meeting counts as empty: grace once, then leave.
    assert_eq!(summary.outcome, SessionOutcome::MeetingEmpty);
    assert_eq!(summary.final_state, SessionState::Terminated);
    assert_eq!(summary.liveness_samples, 2);
}

#[tokio::test]
async fn teardown_runs_exactly_once_and_in_order() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let driver = MockDriver::with_liveness(log.clone(), &[2, 1]);
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.final_state, SessionState::Terminated);
    assert_eq!(log.count("leave"), 1);
    assert_eq!(log.count("remove_audio_pair"), 2);

    // Pipeline cancellation strictly precedes the UI leave action, which
    // strictly precedes device teardown.
    let capture_stop = log.position("capture_stop").expect("capture stopped");
    let leave = log.position("leave").expect("leave invoked");
    let ops = log.ops();
    let final_remove = ops
        .iter()
        .rposition(|o| o == "remove_audio_pair")
        .expect("devices removed");
    assert!(capture_stop < leave, "ops: {:?}", ops);
    assert!(leave < final_remove, "ops: {:?}", ops);
}

#[tokio::test]
async fn recording_artifact_survives_the_session() {
    let log = OpsLog::default();
    let tmp = tempfile::tempdir().unwrap();
    let driver = MockDriver::with_liveness(log.clone(), &[2, 2, 1]);
    let provider = MockProvider {
        log: log.clone(),
        fail_audio: false,
    };

    let orchestrator = build_orchestrator(driver, provider, &log, tmp.path());
    let summary = orchestrator.run().await.unwrap();
    assert!(summary.recorder_started);

    let recording = tmp.path().join(format!("{}.wav", summary.session_id));
    let reader = hound::WavReader::open(&recording).expect("recording exists and is valid");
    assert_eq!(reader.spec().sample_rate, 44100);
    assert_eq!(reader.spec().bits_per_sample, 16);
}
