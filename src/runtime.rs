//! Runtime events emitted by the pipeline for UI and observability.
//!
//! Payloads are small so the audio loop can emit them without blocking;
//! a lagging subscriber simply misses events.

use crate::audio::PlaybackOutcome;
use crate::pipeline::state::{PlaybackStatus, Readiness, RecordingStatus};
use crate::vad::StopReason;
use std::time::Duration;

/// Events that describe what the pipeline is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// The wake word readiness machine moved.
    Readiness(Readiness),
    /// The recording machine moved.
    Recording(RecordingStatus),
    /// The playback machine moved.
    Playback(PlaybackStatus),
    /// First readiness: a startup announcement can play without being
    /// mistaken for the wake word by a cold detector.
    StartupAnnouncementReady,
    /// A chunk crossed the detection threshold while ready.
    WakeWordDetected { label: String, score: f32 },
    /// An active playback was cancelled by a new trigger.
    BargeIn,
    /// A recording finished and was handed off.
    UtteranceCaptured {
        duration: Duration,
        preroll: Duration,
        reason: StopReason,
    },
    /// The utterance transcribed to this text (may be empty).
    Transcript(String),
    /// The assistant asked for a tool.
    ToolCall { name: String, arguments: String },
    /// A tool call finished.
    ToolResult {
        name: String,
        success: bool,
        output: String,
    },
    /// Final reply text about to be spoken.
    AssistantReply(String),
    /// A playback settled.
    PlaybackFinished(PlaybackOutcome),
    /// A turn failed before producing speech.
    TurnFailed(String),
    /// The tool server connected.
    ToolsConnected { tools: Vec<String>, attempts: u32 },
    /// Something is running with reduced capability.
    Degraded(DegradedMode),
}

/// Reduced-capability modes the pipeline can continue in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedMode {
    /// Warm-up did not finish in time; detections may be unreliable.
    WarmupTimedOut,
    /// The tool server could not be reached; no tools are offered.
    ToolsUnavailable { attempts: u32, reason: String },
}
