//! Microphone audio capture using cpal.
//!
//! Captures audio at the device's native sample rate and downsamples
//! to 16kHz mono for the wake word and recording stages.

use crate::audio::{Direction, device_names, open_device, resample_linear, to_mono};
use crate::config::AudioConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::AudioChunk;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A push-based source of mono PCM batches at a fixed sample rate.
///
/// The coordinator takes the source at construction, so tests can swap the
/// microphone for scripted audio.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Rate of every chunk this source emits.
    fn sample_rate(&self) -> u32;

    /// Emit chunks into `tx` until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Device`] when the device cannot be opened or started.
    async fn run(&self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()>;
}

/// Audio capture from system microphone via cpal.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    /// The target sample rate for the pipeline (e.g., 16kHz).
    target_sample_rate: u32,
}

impl CpalCapture {
    /// Open the configured input device, or the default one.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then downsamples to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Device`] if no matching input device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let device = open_device(Direction::Input, config.input_device.as_deref())?;
        let native = device
            .default_input_config()
            .map_err(|e| HarkError::Device(format!("no default input config: {e}")))?;
        let stream_config = StreamConfig {
            channels: native.channels(),
            sample_rate: native.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        debug!(
            "input stream: {}Hz x{} -> {}Hz mono",
            stream_config.sample_rate, stream_config.channels, config.input_sample_rate
        );

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
        })
    }

    /// Names of the available input devices.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Device`] if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        device_names(Direction::Input)
    }
}

#[async_trait]
impl AudioSource for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    async fn run(&self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()> {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = to_mono(data, native_channels);
                    let samples = resample_linear(&mono, native_rate, target_rate);
                    // Never block the device thread.
                    if tx.try_send(AudioChunk::new(samples, target_rate)).is_err() {
                        debug!("audio channel full, dropping chunk");
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| HarkError::Device(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| HarkError::Device(format!("failed to start input stream: {e}")))?;

        info!("audio capture started: native {native_rate}Hz -> target {target_rate}Hz");

        cancel.cancelled().await;

        drop(stream);
        info!("audio capture stopped");
        Ok(())
    }
}
