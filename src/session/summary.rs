use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session
///
/// Owned exclusively by the orchestrator and mutated only by its driving
/// loop; pipeline components never see it, only a read-only stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    DevicesReady,
    Joining,
    InMeeting,
    Leaving,
    Terminated,
}

/// Why the session left the meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// No join affordance was found, or presence was never confirmed
    JoinFailed,
    /// Still alone after the one-time grace period
    MeetingEmpty,
    /// Participant count dropped while the session was active
    LivenessLost,
}

/// Final report for a completed session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,

    /// Final state; always `Terminated`
    pub final_state: SessionState,

    pub outcome: SessionOutcome,

    /// Whether the meeting ever had a second participant
    pub went_active: bool,

    /// Whether the recording pipeline started
    pub recorder_started: bool,

    /// Whether the realtime relay connected
    pub relay_started: bool,

    /// Whether the relay hit a connection-level failure after starting
    pub relay_failed: bool,

    /// Number of liveness samples taken
    pub liveness_samples: usize,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn duration_secs(&self) -> f64 {
        self.ended_at
            .signed_duration_since(self.started_at)
            .num_milliseconds() as f64
            / 1000.0
    }
}
