use serde::{Deserialize, Serialize};

/// Outbound events on the realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Declare the session contract. Sent exactly once, before any audio.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionProperties },

    /// Append one base64 PCM chunk to the remote input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// Finalize the remote input buffer, ending the local speaking turn.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Ask the remote side to respond to the committed buffer.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Inbound events from the realtime connection.
///
/// Only the variants that alter control flow carry payloads the relay
/// reads; advisory events are observed for diagnostics and nothing else.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Connection-level session established; the first speaking turn starts.
    #[serde(rename = "session.created")]
    SessionCreated,

    /// One base64 PCM chunk of response audio, played immediately.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },

    /// Response finished; the turn returns to the local side.
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Advisory speech boundary.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Advisory speech boundary.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// Advisory commit acknowledgement.
    #[serde(rename = "input_audio_buffer.committed")]
    Committed,

    /// Anything this relay does not act on.
    #[serde(other)]
    Unknown,
}

/// Session contract declared to the remote service.
///
/// `turn_detection` is always `null`: turn-taking is decided locally by the
/// silence policy, not by the remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionProperties {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: Option<TranscriptionProperties>,
    pub turn_detection: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionProperties {
    pub model: String,
}

impl SessionProperties {
    pub fn pcm16(voice: &str, instructions: &str, transcription_model: &str) -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: instructions.to_string(),
            voice: voice.to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(TranscriptionProperties {
                model: transcription_model.to_string(),
            }),
            turn_detection: None,
        }
    }
}
