//! Message types passed between pipeline stages.

use crate::vad::StopReason;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A batch of raw audio samples from the microphone.
///
/// Samples are shared and never mutated after creation; every stage that
/// keeps audio copies it out.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Normalized mono f32 samples at `sample_rate`.
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp when this chunk was captured.
    pub captured_at: Instant,
}

impl AudioChunk {
    /// Build a chunk stamped with the current time.
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            captured_at: Instant::now(),
        }
    }

    /// Number of samples in the chunk.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Output of the wake word detector for one fixed-size chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Model score in `[0, 1]`; `0.0` while the feature buffers are filling.
    pub score: f32,
    /// Whether this chunk counts as a wake word detection.
    pub triggered: bool,
    /// Label of the wake word model that produced the score.
    pub label: String,
}

/// A finalized recording handed off by the recording stage.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Pre-roll followed by live audio.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// How many leading samples came from the pre-roll window.
    pub preroll_samples: usize,
    /// Why the recording ended.
    pub reason: StopReason,
}

impl Utterance {
    /// Total audio duration.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// A clip of synthesized speech or a feedback tone, ready for playback.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Mono f32 samples.
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioClip {
    /// Wrap samples as a clip.
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Playing time of the clip.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// Convert a sample count to a duration at `sample_rate`.
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(samples as u64 * 1_000_000 / sample_rate as u64)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn utterance_duration_from_samples() {
        let utterance = Utterance {
            samples: vec![0.0; 24_000],
            sample_rate: 16_000,
            preroll_samples: 4_800,
            reason: StopReason::Silence,
        };
        assert_eq!(utterance.duration(), Duration::from_millis(1_500));
    }

    #[test]
    fn zero_rate_has_zero_duration() {
        assert_eq!(samples_to_duration(100, 0), Duration::ZERO);
    }

    #[test]
    fn chunk_shares_samples_on_clone() {
        let chunk = AudioChunk::new(vec![0.25f32; 8], 16_000);
        let copy = chunk.clone();
        assert!(Arc::ptr_eq(&chunk.samples, &copy.samples));
        assert_eq!(copy.len(), 8);
    }
}
