pub mod audio;
pub mod config;
pub mod devices;
pub mod driver;
pub mod relay;
pub mod session;

pub use audio::{
    stream_wav_file, AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig,
    PlaybackSink, PlaybackSinkFactory, PulseCaptureBackend, PulseCaptureFactory,
    PulsePlaybackFactory, PulsePlaybackSink, RecorderConfig, RecordingMetadata, WavRecorder,
};
pub use config::{Config, Credential};
pub use devices::{
    DeviceError, DeviceHandle, DeviceManager, DeviceNames, PulseDeviceProvider,
    VirtualDeviceProvider,
};
pub use driver::{JoinOutcome, LivenessSignal, MeetingUiDriver, ProcessUiDriver};
pub use relay::{RealtimeRelay, RelayConfig, RelayError, TurnPolicy, TurnState};
pub use session::{Orchestrator, SessionConfig, SessionOutcome, SessionState, SessionSummary};
