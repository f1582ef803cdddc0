//! Recording session lifecycle: `idle → recording → finalizing → idle`.
//!
//! The [`Recorder`] owns the recording state machine and at most one
//! [`RecordingSession`]. The one-session invariant lives in the machine's
//! guard: a trigger while recording is rejected before any session exists.

use crate::pipeline::messages::Utterance;
use crate::pipeline::state::{RecordingEvent, RecordingMachine, RecordingStatus, TransitionRejected};
use crate::vad::{StopReason, VadDecision, VoiceActivityDetector};
use std::time::Instant;
use tracing::{debug, info};

/// Audio and speech-tracking state for one utterance.
#[derive(Debug)]
pub struct RecordingSession {
    started_at: Instant,
    samples: Vec<f32>,
    preroll_samples: usize,
    has_spoken: bool,
    silence_run: usize,
}

impl RecordingSession {
    /// Start a session seeded with an owned copy of the pre-roll.
    pub fn new(preroll: Vec<f32>) -> Self {
        Self {
            started_at: Instant::now(),
            preroll_samples: preroll.len(),
            samples: preroll,
            has_spoken: false,
            silence_run: 0,
        }
    }

    /// Replace the contents of a still-empty session with the pre-roll copy.
    ///
    /// Returns `false` (and leaves the session alone) once live audio has
    /// been appended.
    pub fn seed(&mut self, preroll: Vec<f32>) -> bool {
        if !self.samples.is_empty() {
            return false;
        }
        self.preroll_samples = preroll.len();
        self.samples = preroll;
        true
    }

    /// Append live audio.
    pub fn append(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    /// Record that speech energy was observed; clears the silence run.
    pub fn mark_speech(&mut self) {
        self.has_spoken = true;
        self.silence_run = 0;
    }

    /// Extend the contiguous silence run.
    pub fn extend_silence(&mut self, samples: usize) {
        self.silence_run = self.silence_run.saturating_add(samples);
    }

    /// Recorded length in samples, pre-roll included.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the session holds no audio.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether speech has been observed at least once.
    pub fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    /// Current contiguous silence, in samples.
    pub fn silence_run(&self) -> usize {
        self.silence_run
    }

    /// Number of leading pre-roll samples.
    pub fn preroll_samples(&self) -> usize {
        self.preroll_samples
    }

    /// When the session started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Read-only view of the recorded audio.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Drop audio past `len` samples.
    fn truncate(&mut self, len: usize) {
        self.samples.truncate(len);
        self.preroll_samples = self.preroll_samples.min(len);
    }

    fn into_utterance(self, sample_rate: u32, reason: StopReason) -> Utterance {
        Utterance {
            samples: self.samples,
            sample_rate,
            preroll_samples: self.preroll_samples,
            reason,
        }
    }
}

/// Owns the recording state machine and the single live session.
#[derive(Debug)]
pub struct Recorder {
    machine: RecordingMachine,
    session: Option<RecordingSession>,
    vad: VoiceActivityDetector,
    sample_rate: u32,
}

impl Recorder {
    /// Create an idle recorder.
    pub fn new(vad: VoiceActivityDetector, sample_rate: u32) -> Self {
        Self {
            machine: RecordingMachine::default(),
            session: None,
            vad,
            sample_rate,
        }
    }

    /// Current recording status.
    pub fn status(&self) -> RecordingStatus {
        self.machine.state()
    }

    /// Whether a session is live.
    pub fn is_recording(&self) -> bool {
        self.status() == RecordingStatus::Recording
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Transition `idle → recording` and open an empty session.
    ///
    /// The caller seeds it with [`Recorder::seed`] once any playback has
    /// been cancelled.
    ///
    /// # Errors
    ///
    /// Returns the guard rejection when a session is already live or finalizing.
    pub fn begin(&mut self) -> Result<(), TransitionRejected> {
        self.machine.apply(RecordingEvent::Trigger)?;
        self.session = Some(RecordingSession::new(Vec::new()));
        debug!("recording session opened");
        Ok(())
    }

    /// Seed the freshly opened session with a pre-roll copy.
    pub fn seed(&mut self, preroll: Vec<f32>) -> bool {
        match self.session.as_mut() {
            Some(session) => session.seed(preroll),
            None => false,
        }
    }

    /// Append live audio and let the VAD decide.
    ///
    /// On a stop decision the session walks `recording → finalizing → idle`
    /// synchronously and the finalized audio is returned.
    pub fn push(&mut self, samples: &[f32]) -> Option<Utterance> {
        if !self.is_recording() {
            return None;
        }
        let session = self.session.as_mut()?;
        session.append(samples);

        let reason = match self.vad.evaluate(samples, session) {
            VadDecision::Continue => return None,
            VadDecision::Stop(reason) => reason,
        };

        self.finalize(reason)
    }

    fn finalize(&mut self, reason: StopReason) -> Option<Utterance> {
        if let Err(e) = self.machine.apply(RecordingEvent::Stop) {
            debug!("{e}");
            return None;
        }
        let max_samples = self.vad.max_samples();
        let utterance = self.session.take().map(|mut s| {
            // The batch that crossed the limit may overshoot it.
            if reason == StopReason::MaxLength {
                s.truncate(max_samples);
            }
            s.into_utterance(self.sample_rate, reason)
        });
        // Hand-off is unconditional once the buffer has been taken.
        if let Err(e) = self.machine.apply(RecordingEvent::HandedOff) {
            debug!("{e}");
        }
        if let Some(u) = &utterance {
            info!(
                "recording finalized ({reason:?}): {:.2}s, {} pre-roll samples",
                u.duration().as_secs_f32(),
                u.preroll_samples
            );
        }
        utterance
    }
}
