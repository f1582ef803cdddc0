//! Streaming log-mel front end and the DSP helpers behind it.
//!
//! Built on `rustfft`. Audio is NOT resampled here; callers provide 16kHz.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// FFT window size in samples (25ms at 16kHz).
pub const FRAME_SIZE: usize = 400;
/// Hop size in samples (10ms at 16kHz).
pub const HOP_SIZE: usize = 160;
/// Number of mel filter banks.
pub const NUM_MEL_FILTERS: usize = 26;

/// Converts a sample stream into log-mel frames, one per hop.
///
/// Keeps the unconsumed tail between calls so frames straddle batch
/// boundaries exactly as they would over one long buffer.
pub struct MelFrontend {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filterbank: Vec<Vec<f32>>,
    tail: Vec<f32>,
}

impl MelFrontend {
    /// Front end for audio at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let window = (0..FRAME_SIZE)
            .map(|n| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (FRAME_SIZE - 1) as f32).cos())
            })
            .collect();
        Self {
            fft: planner.plan_fft_forward(FRAME_SIZE),
            window,
            filterbank: build_mel_filterbank(NUM_MEL_FILTERS, FRAME_SIZE, sample_rate),
            tail: Vec::with_capacity(FRAME_SIZE),
        }
    }

    /// Append samples and return every newly complete frame.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.tail.extend_from_slice(samples);
        if self.tail.len() < FRAME_SIZE {
            return Vec::new();
        }

        let num_frames = (self.tail.len() - FRAME_SIZE) / HOP_SIZE + 1;
        let frames = (0..num_frames)
            .map(|i| {
                let start = i * HOP_SIZE;
                self.log_mel(&self.tail[start..start + FRAME_SIZE])
            })
            .collect();
        self.tail.drain(..num_frames * HOP_SIZE);
        frames
    }

    /// Drop any buffered partial frame.
    pub fn clear(&mut self) {
        self.tail.clear();
    }

    /// Log mel energies of exactly one frame.
    fn log_mel(&self, frame: &[f32]) -> Vec<f32> {
        let mut windowed: Vec<Complex<f32>> = frame
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        self.fft.process(&mut windowed);

        // Power spectrum (only first half + DC).
        let power: Vec<f32> = windowed[..FRAME_SIZE / 2 + 1]
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im) / FRAME_SIZE as f32)
            .collect();

        self.filterbank
            .iter()
            .map(|filter| {
                let energy: f32 = filter.iter().zip(&power).map(|(&f, &p)| f * p).sum();
                energy.max(1e-10).ln()
            })
            .collect()
    }
}

/// Log-mel frames of a whole recording.
pub fn log_mel_frames(samples: &[f32], sample_rate: u32) -> Vec<Vec<f32>> {
    MelFrontend::new(sample_rate).push(samples)
}

/// Element-wise mean of equally sized vectors. Empty input gives an empty vector.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut acc = vec![0.0f32; first.len()];
    for v in vectors {
        for (a, &x) in acc.iter_mut().zip(v) {
            *a += x;
        }
    }
    let n = vectors.len() as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    acc
}

/// Build mel-spaced triangular filterbank.
pub fn build_mel_filterbank(num_filters: usize, fft_size: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let power_len = fft_size / 2 + 1;
    let low_freq_mel = hz_to_mel(0.0);
    let high_freq_mel = hz_to_mel(sample_rate as f32 / 2.0);

    let num_points = num_filters + 2;
    let bin_points: Vec<usize> = (0..num_points)
        .map(|i| low_freq_mel + (high_freq_mel - low_freq_mel) * i as f32 / (num_points - 1) as f32)
        .map(|mel| ((fft_size as f32 + 1.0) * mel_to_hz(mel) / sample_rate as f32).floor() as usize)
        .collect();

    (0..num_filters)
        .map(|m| {
            let mut filter = vec![0.0f32; power_len];
            let (left, center, right) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);

            if center > left {
                let denom = (center - left) as f32;
                for (i, val) in filter.iter_mut().enumerate().take(center).skip(left) {
                    *val = (i - left) as f32 / denom;
                }
            }
            if right > center {
                let denom = (right - center) as f32;
                for (i, val) in filter.iter_mut().enumerate().take(right + 1).skip(center) {
                    *val = (right - i) as f32 / denom;
                }
            }
            filter
        })
        .collect()
}

/// DCT-II: extract `num_coeffs` coefficients from `input`.
pub fn dct_ii(input: &[f32], num_coeffs: usize) -> Vec<f32> {
    let n = input.len();
    (0..num_coeffs)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .map(|(i, &val)| {
                    val * (std::f32::consts::PI * k as f32 * (2 * i + 1) as f32 / (2 * n) as f32)
                        .cos()
                })
                .sum()
        })
        .collect()
}

/// Convert frequency in Hz to mel scale.
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Convert mel scale to Hz.
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// DTW distance between two feature sequences, normalized by path length.
///
/// Returns `f32::MAX` when either sequence is empty.
pub fn dtw_distance(input: &[Vec<f32>], reference: &[Vec<f32>]) -> f32 {
    let n = input.len();
    let m = reference.len();
    if n == 0 || m == 0 {
        return f32::MAX;
    }

    let mut cost = vec![f32::MAX; (n + 1) * (m + 1)];
    let idx = |i: usize, j: usize| i * (m + 1) + j;
    cost[idx(0, 0)] = 0.0;

    for i in 1..=n {
        for j in 1..=m {
            let d = euclidean_distance(&input[i - 1], &reference[j - 1]);
            let prev = cost[idx(i - 1, j)]
                .min(cost[idx(i, j - 1)])
                .min(cost[idx(i - 1, j - 1)]);
            cost[idx(i, j)] = d + prev;
        }
    }

    cost[idx(n, m)] / (n + m) as f32
}

/// Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
