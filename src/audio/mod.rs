pub mod backend;
pub mod playback;
pub mod recorder;

pub use backend::{
    AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig, PulseCaptureBackend,
    PulseCaptureFactory,
};
pub use playback::{
    stream_wav_file, PlaybackSink, PlaybackSinkFactory, PulsePlaybackFactory, PulsePlaybackSink,
};
pub use recorder::{RecorderConfig, RecordingMetadata, WavRecorder};
