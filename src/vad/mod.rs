//! Voice activity detection that decides when a recording ends.
//!
//! Energy based: each new batch is classified by RMS energy against
//! `silence_threshold`. Three rules are applied in priority order:
//!
//! 1. **Max length**: a session at or past `max_recording_ms` stops, regardless of energy.
//! 2. **Grace period**: a session younger than `grace_period_ms` that has not
//!    heard speech never stops.
//! 3. **Silence**: the session stops once `trailing_silence_ms` of contiguous
//!    silence has accumulated *and* the session is at least `min_speech_ms` long.

use crate::config::{VadConfig, ms_to_samples};
use crate::pipeline::recording::RecordingSession;
use serde::{Deserialize, Serialize};

/// Why a recording session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Enough trailing silence after the minimum speech duration.
    Silence,
    /// The session reached the maximum recording duration.
    MaxLength,
}

/// Decision for one batch of new samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// Keep recording.
    Continue,
    /// End the session.
    Stop(StopReason),
}

impl VadDecision {
    /// Whether this decision ends the session.
    pub fn is_stop(self) -> bool {
        matches!(self, Self::Stop(_))
    }

    /// The stop reason, if any.
    pub fn reason(self) -> Option<StopReason> {
        match self {
            Self::Continue => None,
            Self::Stop(reason) => Some(reason),
        }
    }
}

/// Energy-based end-of-utterance detector.
///
/// All durations are held as sample counts at the pipeline sample rate so
/// boundaries are exact.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    silence_threshold: f32,
    grace_samples: usize,
    trailing_silence_samples: usize,
    min_speech_samples: usize,
    max_samples: usize,
}

impl VoiceActivityDetector {
    /// Create a detector for audio at `sample_rate`.
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            grace_samples: ms_to_samples(sample_rate, config.grace_period_ms),
            trailing_silence_samples: ms_to_samples(sample_rate, config.trailing_silence_ms),
            min_speech_samples: ms_to_samples(sample_rate, config.min_speech_ms),
            max_samples: ms_to_samples(sample_rate, config.max_recording_ms),
        }
    }

    /// Evaluate `new_samples`, which the caller has already appended to `session`.
    ///
    /// Updates the session's speech flag and silence run, then applies the
    /// three stop rules in priority order.
    pub fn evaluate(&self, new_samples: &[f32], session: &mut RecordingSession) -> VadDecision {
        let is_speech = compute_rms_energy(new_samples) > self.silence_threshold;
        if is_speech {
            session.mark_speech();
        } else {
            session.extend_silence(new_samples.len());
        }

        let recorded = session.len();

        if recorded >= self.max_samples {
            return VadDecision::Stop(StopReason::MaxLength);
        }

        if !session.has_spoken() && recorded < self.grace_samples {
            return VadDecision::Continue;
        }

        if session.silence_run() >= self.trailing_silence_samples
            && recorded >= self.min_speech_samples
        {
            return VadDecision::Stop(StopReason::Silence);
        }

        VadDecision::Continue
    }

    /// Maximum session length in samples.
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Minimum length in samples before silence may end a session.
    pub fn min_speech_samples(&self) -> usize {
        self.min_speech_samples
    }
}

/// Compute RMS energy of audio samples.
pub fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
