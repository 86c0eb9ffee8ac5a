use std::time::Duration;

use tokio::time::Instant;

use crate::audio::AudioFrame;

/// Silence policy that decides when the local speaking turn ends.
///
/// Threshold and duration are policy, not mechanism; both come from
/// configuration with documented defaults.
#[derive(Debug, Clone)]
pub struct TurnPolicy {
    /// Mean absolute magnitude below which a chunk counts as silent
    pub silence_threshold: f64,
    /// Elapsed silence that ends the turn
    pub silence_duration: Duration,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            silence_threshold: 1000.0,
            silence_duration: Duration::from_secs(5),
        }
    }
}

/// Running silence state for one speaking turn.
///
/// Mutated only by the relay's send loop; reset on any non-silent frame.
#[derive(Debug)]
pub struct TurnState {
    silent_run: Duration,
    last_activity: Instant,
}

impl TurnState {
    pub fn new() -> Self {
        Self {
            silent_run: Duration::ZERO,
            last_activity: Instant::now(),
        }
    }

    /// Account one captured chunk. Returns true when accumulated silence
    /// has reached the policy duration and the turn should be committed.
    pub fn observe(&mut self, frame: &AudioFrame, policy: &TurnPolicy) -> bool {
        if frame.mean_magnitude() < policy.silence_threshold {
            self.silent_run += frame.duration();
        } else {
            self.silent_run = Duration::ZERO;
            self.last_activity = Instant::now();
        }

        self.silent_run >= policy.silence_duration
    }

    /// Instant of the last non-silent chunk.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new()
    }
}
