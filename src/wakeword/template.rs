//! Reference-recording wake word model (MFCC + DTW).
//!
//! Each embedding summarizes one 80ms chunk: the mean log-mel energy of
//! its newest 8 frames, normalized against the whole 76-frame window and
//! reduced to MFCCs. A window of 16 embeddings is compared against every
//! reference recording with DTW; `score = 1 / (1 + distance)`.

use crate::config::WakewordConfig;
use crate::error::{HarkError, Result};
use crate::wakeword::WakewordModel;
use crate::wakeword::features::{dct_ii, dtw_distance, log_mel_frames, mean_vector};
use std::path::Path;
use tracing::info;

/// Log-mel frames per 80ms chunk at 16kHz.
const FRAMES_PER_EMBEDDING: usize = 8;
/// Expected sample rate of reference recordings.
const REFERENCE_SAMPLE_RATE: u32 = 16_000;

/// Template matcher over recorded examples of the wake word.
pub struct TemplateModel {
    label: String,
    num_mfcc: usize,
    /// Embedding sequences, one per reference recording.
    references: Vec<Vec<Vec<f32>>>,
}

impl TemplateModel {
    /// Load every `.wav` in the configured references directory.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] when the directory holds no usable reference.
    pub fn load(config: &WakewordConfig) -> Result<Self> {
        let mut model = Self {
            label: config.label.clone(),
            num_mfcc: config.num_mfcc.max(1),
            references: Vec::new(),
        };

        let dir = &config.references_dir;
        let entries = std::fs::read_dir(dir).map_err(|e| {
            HarkError::Config(format!("cannot read references dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry
                .map_err(|e| HarkError::Config(format!("cannot read dir entry: {e}")))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("wav") {
                continue;
            }
            match load_wav_mono(&path) {
                Ok(samples) => {
                    if model.add_reference(&samples) {
                        info!("loaded wake word reference: {}", path.display());
                    }
                }
                Err(e) => info!("skipping invalid reference {}: {e}", path.display()),
            }
        }

        if model.references.is_empty() {
            return Err(HarkError::Config(format!(
                "no wake word reference recordings found in {}",
                dir.display()
            )));
        }
        info!(
            "wake word model '{}' ready with {} reference(s)",
            model.label,
            model.references.len()
        );
        Ok(model)
    }

    /// Build a model from in-memory reference recordings at 16kHz.
    pub fn from_samples(label: impl Into<String>, num_mfcc: usize, references: &[Vec<f32>]) -> Self {
        let mut model = Self {
            label: label.into(),
            num_mfcc: num_mfcc.max(1),
            references: Vec::new(),
        };
        for samples in references {
            model.add_reference(samples);
        }
        model
    }

    /// Number of usable references.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    fn add_reference(&mut self, samples: &[f32]) -> bool {
        let frames = log_mel_frames(samples, REFERENCE_SAMPLE_RATE);
        let global = mean_vector(&frames);
        let sequence: Vec<Vec<f32>> = frames
            .chunks(FRAMES_PER_EMBEDDING)
            .filter(|block| block.len() == FRAMES_PER_EMBEDDING)
            .map(|block| self.cepstrum(block, &global))
            .collect();
        if sequence.is_empty() {
            return false;
        }
        self.references.push(sequence);
        true
    }

    /// Mean-normalized MFCCs of `block` relative to `global`.
    fn cepstrum(&self, block: &[Vec<f32>], global: &[f32]) -> Vec<f32> {
        let local = mean_vector(block);
        let centered: Vec<f32> = local.iter().zip(global).map(|(l, g)| l - g).collect();
        dct_ii(&centered, self.num_mfcc)
    }
}

impl WakewordModel for TemplateModel {
    fn label(&self) -> &str {
        &self.label
    }

    fn embed(&mut self, mel_window: &[Vec<f32>]) -> Result<Vec<f32>> {
        if mel_window.len() < FRAMES_PER_EMBEDDING {
            return Err(HarkError::Detection(format!(
                "mel window too short: {} frames",
                mel_window.len()
            )));
        }
        let global = mean_vector(mel_window);
        let newest = &mel_window[mel_window.len() - FRAMES_PER_EMBEDDING..];
        let embedding = self.cepstrum(newest, &global);
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(HarkError::Detection("non-finite embedding".into()));
        }
        Ok(embedding)
    }

    fn classify(&mut self, embeddings: &[Vec<f32>]) -> Result<f32> {
        let best = self
            .references
            .iter()
            .map(|reference| dtw_distance(embeddings, reference))
            .fold(f32::MAX, f32::min);
        if best == f32::MAX {
            return Err(HarkError::Detection("no references to compare".into()));
        }
        Ok(1.0 / (1.0 + best))
    }
}

/// Load a WAV file as mono f32 samples at 16kHz.
fn load_wav_mono(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| HarkError::Config(format!("cannot open WAV {}: {e}", path.display())))?;

    let spec = reader.spec();
    if spec.sample_rate != REFERENCE_SAMPLE_RATE {
        return Err(HarkError::Config(format!(
            "reference WAV must be {REFERENCE_SAMPLE_RATE}Hz, got {}Hz: {}",
            spec.sample_rate,
            path.display()
        )));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| v as f32 / max)
                        .map_err(|e| HarkError::Config(format!("WAV read error: {e}")))
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| HarkError::Config(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    Ok(crate::audio::to_mono(&samples, spec.channels))
}

/// Save audio samples as a 16-bit mono WAV reference file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_reference_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| HarkError::Config(format!("cannot create WAV: {e}")))?;

    for &s in samples {
        let sample_i16 = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| HarkError::Config(format!("WAV write error: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| HarkError::Config(format!("WAV finalize error: {e}")))?;

    Ok(())
}
