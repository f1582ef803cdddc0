//! The voice pipeline: microphone chunks in, spoken replies out.
//!
//! `messages` holds the data passed between stages, `state` the three
//! sub-machines, `recording` the session lifecycle, `turn` the assistant
//! round trip and `coordinator` the loop that ties them together.

pub mod coordinator;
pub mod messages;
pub mod recording;
pub mod state;
pub mod turn;
