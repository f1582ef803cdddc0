//! Short synthesized feedback tones.

use crate::pipeline::messages::AudioClip;
use std::f32::consts::PI;

/// Rising two-note chirp acknowledging a wake word trigger.
pub fn feedback_tone(sample_rate: u32) -> AudioClip {
    let mut samples = tone(sample_rate, 660.0, 70);
    samples.extend(tone(sample_rate, 990.0, 90));
    AudioClip::new(samples, sample_rate)
}

/// A sine tone with a short linear fade at both ends to avoid clicks.
pub fn tone(sample_rate: u32, freq_hz: f32, duration_ms: u32) -> Vec<f32> {
    let len = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let fade = (sample_rate as usize / 200).min(len / 2).max(1);
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let env = if i < fade {
                i as f32 / fade as f32
            } else if i >= len - fade {
                (len - i) as f32 / fade as f32
            } else {
                1.0
            };
            (2.0 * PI * freq_hz * t).sin() * 0.25 * env
        })
        .collect()
}
