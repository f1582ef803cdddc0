//! Audio capture, pre-roll, playback and feedback tones via cpal.

pub mod capture;
pub mod playback;
pub mod preroll;
pub mod tone;

pub use capture::{AudioSource, CpalCapture};
pub use playback::{AudioSink, CpalPlayback, PlaybackController, PlaybackHandle, PlaybackOutcome};
pub use preroll::PreRollBuffer;

use crate::error::{HarkError, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// Side of the audio host a device is opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

fn host_devices(host: &cpal::Host, direction: Direction) -> Result<Vec<cpal::Device>> {
    let devices = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    };
    devices.map_err(|e| {
        HarkError::Device(format!("cannot enumerate {} devices: {e}", direction.as_str()))
    })
}

/// Human-readable device name, `<unknown>` when the host cannot describe it.
pub(crate) fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into())
}

/// Open the device called `wanted`, or the host default when `None`.
pub(crate) fn open_device(direction: Direction, wanted: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let device = match wanted {
        Some(name) => host_devices(&host, direction)?
            .into_iter()
            .find(|d| device_name(d) == name)
            .ok_or_else(|| {
                HarkError::Device(format!("{} device '{name}' not found", direction.as_str()))
            })?,
        None => match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
        .ok_or_else(|| HarkError::Device(format!("no default {} device", direction.as_str())))?,
    };
    tracing::info!("using {} device: {}", direction.as_str(), device_name(&device));
    Ok(device)
}

/// Names of every device on one side of the default host.
pub(crate) fn device_names(direction: Direction) -> Result<Vec<String>> {
    let host = cpal::default_host();
    Ok(host_devices(&host, direction)?
        .iter()
        .map(device_name)
        .collect())
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    if ch == 1 {
        return data.to_vec();
    }
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Used for mic downsampling (48kHz → 16kHz) and for matching synthesized
/// speech to the output device rate. No anti-alias filter: speech energy
/// sits below 8kHz.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn stereo_to_mono_averages() {
        let mono = to_mono(&[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn resample_48k_to_16k_thirds_length() {
        let input = vec![0.25f32; 4_800];
        let out = resample_linear(&input, 48_000, 16_000);
        assert_eq!(out.len(), 1_600);
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn resample_upsamples_24k_to_48k() {
        let out = resample_linear(&[0.0, 1.0], 24_000, 48_000);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        assert_eq!(resample_linear(&[0.1, 0.2], 16_000, 16_000), vec![0.1, 0.2]);
    }
}
