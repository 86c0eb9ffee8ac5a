//! Realtime duplex voice relay
//!
//! Bridges the meeting's live audio to the remote speech service over one
//! persistent connection: a silence-gated send loop forwards captured
//! chunks, and a receive loop plays response audio and hands the speaking
//! turn back and forth.

pub mod client;
pub mod messages;
pub mod turn;

pub use client::{RealtimeRelay, RelayConfig, RelayError};
pub use messages::{ClientEvent, ServerEvent, SessionProperties, TranscriptionProperties};
pub use turn::{TurnPolicy, TurnState};
