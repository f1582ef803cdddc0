//! Streaming wake word detection with a warm-up protocol.
//!
//! Audio is scored in fixed 1280-sample (80ms) chunks. Each chunk extends a
//! rolling log-mel buffer (76 frames); once that is full every chunk adds an
//! embedding to a rolling embedding buffer (16 entries); once *that* is full
//! the model scores the chunk. Both buffers fill after roughly two seconds.
//!
//! Full buffers are not the same as trustworthy scores. After the first fill
//! the detector spends `warmup_ms` of scored audio in a stabilization period
//! during which detections are suppressed. Completion is published through
//! one memoized future ([`WakeWordDetector::warmup`]) shared by every waiter.
//! Warm-up happens at most once per detector; [`WakeWordDetector::reset`]
//! re-arms detection without repeating it.

pub mod features;
pub mod template;

pub use template::TemplateModel;

use crate::config::{WakewordConfig, ms_to_samples};
use crate::error::{HarkError, Result};
use crate::pipeline::messages::DetectionResult;
use crate::pipeline::state::{Readiness, ReadinessEvent, ReadinessMachine};
use features::MelFrontend;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Samples per scored chunk (80ms at 16kHz).
pub const CHUNK_SIZE: usize = 1280;
/// Log-mel frames fed to each embedding.
pub const MEL_WINDOW_FRAMES: usize = 76;
/// Embeddings fed to each classification.
pub const EMBEDDING_WINDOW: usize = 16;
/// The only sample rate the detector accepts.
pub const DETECTOR_SAMPLE_RATE: u32 = 16_000;

/// Opaque scoring function behind the detector.
pub trait WakewordModel: Send {
    /// Label reported with every detection.
    fn label(&self) -> &str;

    /// Reduce a full log-mel window (oldest frame first) to one embedding.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Detection`] when the window cannot be embedded.
    fn embed(&mut self, mel_window: &[Vec<f32>]) -> Result<Vec<f32>>;

    /// Score a full embedding window (oldest first) in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Detection`] when scoring fails.
    fn classify(&mut self, embeddings: &[Vec<f32>]) -> Result<f32>;
}

/// How warm-up ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// The stabilization period completed.
    Stable,
    /// The wait ran out; detection proceeds in degraded mode.
    TimedOut,
    /// The detector was dropped before warm-up finished.
    Abandoned,
}

/// Memoized warm-up completion future.
pub type WarmupFuture = Shared<BoxFuture<'static, WarmupOutcome>>;

/// Stateful wake word scorer.
pub struct WakeWordDetector {
    model: Box<dyn WakewordModel>,
    threshold: f32,
    frontend: MelFrontend,
    pending: Vec<f32>,
    mel: VecDeque<Vec<f32>>,
    embeddings: VecDeque<Vec<f32>>,
    readiness: ReadinessMachine,
    warmup_chunks: usize,
    scored_during_warmup: usize,
    warmup_tx: Option<oneshot::Sender<WarmupOutcome>>,
    warmup: WarmupFuture,
}

impl WakeWordDetector {
    /// Load the reference-template model from `config` and build a detector.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] when references are missing or the rate is not 16kHz.
    pub fn initialize(config: &WakewordConfig, sample_rate: u32) -> Result<Self> {
        let model = TemplateModel::load(config)?;
        Self::new(Box::new(model), config, sample_rate)
    }

    /// Build a detector around `model`.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] when `sample_rate` is not 16kHz.
    pub fn new(
        model: Box<dyn WakewordModel>,
        config: &WakewordConfig,
        sample_rate: u32,
    ) -> Result<Self> {
        if sample_rate != DETECTOR_SAMPLE_RATE {
            return Err(HarkError::Config(format!(
                "wake word detector requires {DETECTOR_SAMPLE_RATE}Hz audio, got {sample_rate}Hz"
            )));
        }

        let (warmup_tx, warmup_rx) = oneshot::channel();
        let warmup = async move { warmup_rx.await.unwrap_or(WarmupOutcome::Abandoned) }
            .boxed()
            .shared();

        Ok(Self {
            model,
            threshold: config.threshold,
            frontend: MelFrontend::new(sample_rate),
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            mel: VecDeque::with_capacity(MEL_WINDOW_FRAMES + 8),
            embeddings: VecDeque::with_capacity(EMBEDDING_WINDOW + 1),
            readiness: ReadinessMachine::default(),
            warmup_chunks: ms_to_samples(sample_rate, config.warmup_ms).div_ceil(CHUNK_SIZE),
            scored_during_warmup: 0,
            warmup_tx: Some(warmup_tx),
            warmup,
        })
    }

    /// Current readiness.
    pub fn readiness(&self) -> Readiness {
        self.readiness.state()
    }

    /// Whether detections are currently trusted.
    pub fn is_ready(&self) -> bool {
        matches!(self.readiness(), Readiness::Ready { .. })
    }

    /// The model's label.
    pub fn label(&self) -> &str {
        self.model.label()
    }

    /// Future resolving once warm-up completes or is forced.
    ///
    /// Every call returns a clone of the same future; once it has resolved,
    /// awaiting it again completes immediately.
    pub fn warmup(&self) -> WarmupFuture {
        self.warmup.clone()
    }

    /// Feed a batch of any length; score every complete chunk it finishes.
    ///
    /// A chunk whose scoring fails is logged and skipped.
    pub fn process(&mut self, samples: &[f32]) -> Vec<DetectionResult> {
        self.pending.extend_from_slice(samples);
        let mut results = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending[offset..offset + CHUNK_SIZE].to_vec();
            offset += CHUNK_SIZE;
            match self.score_chunk(&chunk) {
                Ok(result) => results.push(result),
                Err(e) => warn!("wake word chunk skipped: {e}"),
            }
        }
        self.pending.drain(..offset);
        results
    }

    /// Score exactly one [`CHUNK_SIZE`] chunk.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Detection`] for a wrongly sized chunk or a model failure.
    pub fn score_chunk(&mut self, chunk: &[f32]) -> Result<DetectionResult> {
        if chunk.len() != CHUNK_SIZE {
            return Err(HarkError::Detection(format!(
                "expected {CHUNK_SIZE} samples, got {}",
                chunk.len()
            )));
        }

        for frame in self.frontend.push(chunk) {
            self.mel.push_back(frame);
        }
        while self.mel.len() > MEL_WINDOW_FRAMES {
            self.mel.pop_front();
        }
        if self.mel.len() < MEL_WINDOW_FRAMES {
            return Ok(self.result(0.0, false));
        }

        let embedding = self.model.embed(self.mel.make_contiguous())?;
        self.embeddings.push_back(embedding);
        if self.embeddings.len() > EMBEDDING_WINDOW {
            self.embeddings.pop_front();
        }
        if self.embeddings.len() < EMBEDDING_WINDOW {
            return Ok(self.result(0.0, false));
        }

        let score = self.model.classify(self.embeddings.make_contiguous())?;
        if !score.is_finite() {
            return Err(HarkError::Detection("non-finite score".into()));
        }
        let score = score.clamp(0.0, 1.0);

        if self.readiness() == Readiness::Cold {
            self.transition(ReadinessEvent::BuffersFilled);
            info!(
                "wake word buffers full, stabilizing for {} chunks",
                self.warmup_chunks
            );
        }

        if self.readiness() == Readiness::WarmingUp {
            if self.scored_during_warmup < self.warmup_chunks {
                self.scored_during_warmup += 1;
                return Ok(self.result(score, false));
            }
            self.transition(ReadinessEvent::Stabilized);
            self.complete_warmup(WarmupOutcome::Stable);
            info!("wake word detector ready");
        }

        Ok(self.result(score, score >= self.threshold))
    }

    /// Stop waiting for stabilization and trust detections from now on.
    ///
    /// Returns `true` if this call ended the warm-up.
    pub fn force_ready(&mut self) -> bool {
        if self.is_ready() {
            return false;
        }
        self.transition(ReadinessEvent::WarmupTimedOut);
        self.complete_warmup(WarmupOutcome::TimedOut);
        warn!("wake word warm-up timed out; detections may be unreliable");
        true
    }

    /// Re-arm after a trigger by clearing the embedding window.
    ///
    /// Readiness is kept: warm-up is never repeated.
    pub fn reset(&mut self) {
        self.embeddings.clear();
        debug!("wake word detector re-armed");
    }

    fn transition(&mut self, event: ReadinessEvent) {
        if let Err(e) = self.readiness.apply(event) {
            debug!("{e}");
        }
    }

    fn complete_warmup(&mut self, outcome: WarmupOutcome) {
        if let Some(tx) = self.warmup_tx.take() {
            let _ = tx.send(outcome);
        }
    }

    fn result(&self, score: f32, triggered: bool) -> DetectionResult {
        DetectionResult {
            score,
            triggered,
            label: self.model.label().to_owned(),
        }
    }
}
