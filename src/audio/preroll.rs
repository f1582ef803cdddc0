//! Sliding window of the most recent microphone audio.
//!
//! Always populated, so audio just before a wake word trigger is not lost.
//! Owned by the audio loop; everything else only sees owned snapshots.

use crate::config::ms_to_samples;
use std::collections::VecDeque;

/// Fixed-capacity ring of recent samples.
#[derive(Debug, Clone)]
pub struct PreRollBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl PreRollBuffer {
    /// Create a buffer holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Create a buffer holding `duration_ms` of audio at `sample_rate`.
    pub fn with_duration(sample_rate: u32, duration_ms: u32) -> Self {
        Self::new(ms_to_samples(sample_rate, duration_ms))
    }

    /// Append samples, evicting the oldest beyond capacity.
    pub fn append(&mut self, chunk: &[f32]) {
        if self.capacity == 0 {
            return;
        }
        // Only the tail of an oversized chunk can survive.
        let tail = if chunk.len() > self.capacity {
            &chunk[chunk.len() - self.capacity..]
        } else {
            chunk
        };
        let overflow = (self.samples.len() + tail.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(tail.iter().copied());
    }

    /// Owned copy of the window, oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }

    /// Samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing has been ingested yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum samples held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
