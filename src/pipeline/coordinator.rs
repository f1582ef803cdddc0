//! Pipeline orchestrator that wires the audio loop to the assistant round trip.
//!
//! All three state machines (readiness, recording, playback) are updated
//! synchronously inside [`PipelineCoordinator::handle_audio`], one chunk at a
//! time in arrival order. Work that takes seconds (assistant turns, tool
//! connection, playback completion) runs in separate tasks and reports back
//! through [`Signal`]s; no task touches audio-loop state directly.

use crate::audio::{AudioSink, PlaybackController, PlaybackHandle, PreRollBuffer, tone};
use crate::config::HarkConfig;
use crate::error::{HarkError, Result};
use crate::llm::{Assistant, ChatMessage, trim_history};
use crate::pipeline::messages::{AudioChunk, DetectionResult, Utterance, samples_to_duration};
use crate::pipeline::recording::{Recorder, RecordingSession};
use crate::pipeline::state::{
    PlaybackEvent, PlaybackMachine, PlaybackStatus, Readiness, RecordingStatus,
};
use crate::pipeline::turn::{TurnContext, TurnOutcome, run_turn};
use crate::runtime::{DegradedMode, RuntimeEvent};
use crate::stt::Transcriber;
use crate::tools::{ConnectError, ConnectedTools, ToolConnectionManager};
use crate::tts::SpeechSynthesizer;
use crate::vad::VoiceActivityDetector;
use crate::wakeword::WakeWordDetector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often the run loop checks timers while no audio arrives.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// External collaborators of the assistant round trip.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub assistant: Arc<dyn Assistant>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Completion reports from tasks running off the audio loop.
pub enum Signal {
    /// A turn task finished.
    TurnFinished {
        id: u64,
        result: Result<TurnOutcome>,
    },
    /// A playback settled.
    PlaybackFinished {
        id: u64,
        outcome: crate::audio::PlaybackOutcome,
    },
    /// The tool connection loop finished.
    ToolsConnected(std::result::Result<ConnectedTools, ConnectError>),
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TurnFinished { id, result } => f
                .debug_struct("TurnFinished")
                .field("id", id)
                .field("ok", &result.is_ok())
                .finish(),
            Self::PlaybackFinished { id, outcome } => f
                .debug_struct("PlaybackFinished")
                .field("id", id)
                .field("outcome", outcome)
                .finish(),
            Self::ToolsConnected(result) => f
                .debug_tuple("ToolsConnected")
                .field(&result.is_ok())
                .finish(),
        }
    }
}

struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
}

/// Orchestrates wake word, recording, the assistant round trip and playback.
pub struct PipelineCoordinator {
    config: HarkConfig,
    sample_rate: u32,
    detector: WakeWordDetector,
    preroll: PreRollBuffer,
    recorder: Recorder,
    playback: PlaybackController,
    playback_state: PlaybackMachine,
    cooldown_until: Option<Instant>,
    collaborators: Collaborators,
    tools: Option<ConnectedTools>,
    history: Vec<ChatMessage>,
    turn: Option<ActiveTurn>,
    next_turn_id: u64,
    first_audio_at: Option<Instant>,
    announced: bool,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: Option<mpsc::UnboundedReceiver<Signal>>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    shutdown: CancellationToken,
}

impl PipelineCoordinator {
    /// Create a coordinator owning `detector` and playing through `sink`.
    pub fn new(
        config: HarkConfig,
        detector: WakeWordDetector,
        sink: Arc<dyn AudioSink>,
        collaborators: Collaborators,
    ) -> Self {
        let sample_rate = config.audio.input_sample_rate;
        let shutdown = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            sample_rate,
            detector,
            preroll: PreRollBuffer::with_duration(sample_rate, config.preroll.duration_ms),
            recorder: Recorder::new(VoiceActivityDetector::new(&config.vad, sample_rate), sample_rate),
            playback: PlaybackController::new(sink, shutdown.clone()),
            playback_state: PlaybackMachine::default(),
            cooldown_until: None,
            collaborators,
            tools: None,
            history: Vec::new(),
            turn: None,
            next_turn_id: 0,
            first_audio_at: None,
            announced: false,
            signal_tx,
            signal_rx: Some(signal_rx),
            runtime_tx: None,
            shutdown,
            config,
        }
    }

    /// Attach a runtime event broadcaster for UI/observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Use an already connected tool session.
    pub fn with_tools(mut self, tools: ConnectedTools) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Take the signal receiver to drive [`Self::handle_signal`] manually.
    ///
    /// [`Self::run`] needs it, so only callers that never call `run` should take it.
    pub fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<Signal>> {
        self.signal_rx.take()
    }

    /// Current wake word readiness.
    pub fn readiness(&self) -> Readiness {
        self.detector.readiness()
    }

    /// Current recording status.
    pub fn recording_status(&self) -> RecordingStatus {
        self.recorder.status()
    }

    /// The live recording session, if any.
    pub fn recording(&self) -> Option<&RecordingSession> {
        self.recorder.session()
    }

    /// Current playback status.
    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback_state.state()
    }

    /// The active playback, if any.
    pub fn active_playback(&self) -> Option<&PlaybackHandle> {
        self.playback.active()
    }

    /// Conversation so far, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// The connected tool session, if any.
    pub fn tools(&self) -> Option<&ConnectedTools> {
        self.tools.as_ref()
    }

    /// Token cancelled when the pipeline shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect to the tool server in the background.
    ///
    /// The audio loop keeps running; the result arrives as [`Signal::ToolsConnected`].
    pub fn connect_tools(&self, manager: ToolConnectionManager) {
        let tx = self.signal_tx.clone();
        let max_attempts = self.config.tools.max_attempts;
        let base_delay = Duration::from_millis(self.config.tools.base_delay_ms);
        tokio::spawn(async move {
            let result = manager.connect(max_attempts, base_delay).await;
            let _ = tx.send(Signal::ToolsConnected(result));
        });
    }

    /// Process one microphone batch.
    ///
    /// Order within a batch: pre-roll append, wake word scoring, trigger
    /// handling, then recording. A batch that triggers is already in the
    /// pre-roll snapshot and is not appended to the recording again.
    pub fn handle_audio(&mut self, chunk: &AudioChunk) {
        if chunk.sample_rate != self.sample_rate {
            warn!(
                "dropping {}Hz chunk, pipeline runs at {}Hz",
                chunk.sample_rate, self.sample_rate
            );
            return;
        }
        let now = Instant::now();
        self.first_audio_at.get_or_insert(now);

        self.preroll.append(&chunk.samples);

        let before = self.detector.readiness();
        let detections = self.detector.process(&chunk.samples);
        self.after_readiness_change(before);

        let mut started = false;
        if let Some(detection) = detections.iter().find(|d| d.triggered) {
            started = self.on_wake_word(detection);
        }

        if !started && self.recorder.is_recording() {
            if let Some(utterance) = self.recorder.push(&chunk.samples) {
                self.on_utterance(utterance);
            }
        }

        self.on_tick_at(now);
    }

    /// Check wall-clock timers: warm-up timeout and cooldown expiry.
    pub fn on_tick(&mut self) {
        self.on_tick_at(Instant::now());
    }

    fn on_tick_at(&mut self, now: Instant) {
        if let Some(first) = self.first_audio_at {
            let timeout = Duration::from_millis(u64::from(self.config.wakeword.warmup_timeout_ms));
            if !self.detector.is_ready() && now.duration_since(first) >= timeout {
                let before = self.detector.readiness();
                if self.detector.force_ready() {
                    self.emit(RuntimeEvent::Degraded(DegradedMode::WarmupTimedOut));
                }
                self.after_readiness_change(before);
            }
        }

        if self.cooldown_until.is_some_and(|until| now >= until) {
            self.cooldown_until = None;
            self.transition_playback(PlaybackEvent::CooldownElapsed);
        }
    }

    /// Apply a completion report from a background task.
    pub fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::TurnFinished { id, result } => self.on_turn_finished(id, result),
            Signal::PlaybackFinished { id, outcome } => {
                if self.playback.active().is_none_or(|h| h.id() != id) {
                    debug!("ignoring stale playback {id} ({outcome:?})");
                    return;
                }
                self.playback.settled(id);
                info!("playback {id} finished: {outcome:?}");
                self.emit(RuntimeEvent::PlaybackFinished(outcome));
                if self.transition_playback(PlaybackEvent::Finished) {
                    let cooldown = Duration::from_millis(u64::from(self.config.playback.cooldown_ms));
                    self.cooldown_until = Some(Instant::now() + cooldown);
                }
            }
            Signal::ToolsConnected(Ok(tools)) => {
                self.emit(RuntimeEvent::ToolsConnected {
                    tools: tools.tools.iter().map(|t| t.name.clone()).collect(),
                    attempts: tools.attempts,
                });
                self.tools = Some(tools);
            }
            Signal::ToolsConnected(Err(e)) => {
                warn!("continuing without tools: {e}");
                for line in &e.diagnostics {
                    warn!("tool server: {line}");
                }
                self.emit(RuntimeEvent::Degraded(DegradedMode::ToolsUnavailable {
                    attempts: e.attempts,
                    reason: e.last_error,
                }));
            }
        }
    }

    /// Drive the pipeline from `audio_rx` until it closes or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] when the signal receiver was taken.
    pub async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<AudioChunk>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut signals = self
            .signal_rx
            .take()
            .ok_or_else(|| HarkError::Channel("signal receiver already taken".into()))?;
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("pipeline running at {}Hz", self.sample_rate);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("pipeline cancelled");
                    break;
                }
                chunk = audio_rx.recv() => match chunk {
                    Some(chunk) => self.handle_audio(&chunk),
                    None => {
                        info!("audio source closed");
                        break;
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
                _ = tick.tick() => self.on_tick(),
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Cancel the turn and playback, waiting up to the cancel budget for output to stop.
    pub async fn stop(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.cancel.cancel();
        }
        let active = self.playback.active().cloned();
        self.shutdown.cancel();
        if let Some(handle) = active {
            let budget = Duration::from_millis(u64::from(self.config.playback.cancel_budget_ms));
            match tokio::time::timeout(budget, handle.completion()).await {
                Ok(outcome) => debug!("playback {} stopped: {outcome:?}", handle.id()),
                Err(_) => warn!(
                    "playback {} did not stop within {}ms",
                    handle.id(),
                    budget.as_millis()
                ),
            }
        }
    }

    // ── transitions ─────────────────────────────────────────────────

    /// Returns whether a new recording session started.
    fn on_wake_word(&mut self, detection: &DetectionResult) -> bool {
        info!(
            "wake word '{}' detected (score {:.3})",
            detection.label, detection.score
        );
        self.emit(RuntimeEvent::WakeWordDetected {
            label: detection.label.clone(),
            score: detection.score,
        });

        // 1. Session transition; a live session rejects the trigger.
        if let Err(e) = self.recorder.begin() {
            debug!("{e}");
            return false;
        }
        self.emit(RuntimeEvent::Recording(RecordingStatus::Recording));

        // 2. Barge-in: stop the turn and whatever it is playing.
        let mut interrupted = false;
        if let Some(turn) = self.turn.take() {
            turn.cancel.cancel();
            interrupted = true;
        }
        interrupted |= self.playback.cancel_active();
        if matches!(
            self.playback_state.state(),
            PlaybackStatus::Playing | PlaybackStatus::Cooldown
        ) && self.playback.active().is_none_or(PlaybackHandle::is_interruptible)
        {
            self.cooldown_until = None;
            self.transition_playback(PlaybackEvent::Interrupted);
        }
        if interrupted {
            info!("barge-in: cancelled active response");
            self.emit(RuntimeEvent::BargeIn);
        }

        // 3. Seed with live microphone audio only.
        self.recorder.seed(self.preroll.snapshot());
        self.detector.reset();

        if self.config.playback.feedback_tone {
            let clip = tone::feedback_tone(self.config.audio.output_sample_rate);
            let handle = self.playback.play(clip);
            self.track_playback(&handle);
        }
        true
    }

    fn on_utterance(&mut self, utterance: Utterance) {
        self.emit(RuntimeEvent::Recording(RecordingStatus::Finalizing));
        self.emit(RuntimeEvent::Recording(RecordingStatus::Idle));
        self.emit(RuntimeEvent::UtteranceCaptured {
            duration: utterance.duration(),
            preroll: samples_to_duration(utterance.preroll_samples, utterance.sample_rate),
            reason: utterance.reason,
        });

        if let Some(previous) = self.turn.take() {
            previous.cancel.cancel();
        }
        self.next_turn_id += 1;
        let id = self.next_turn_id;
        let cancel = self.shutdown.child_token();
        let ctx = self.turn_context();
        let history = self.history.clone();
        let tx = self.signal_tx.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = run_turn(ctx, utterance, history, task_cancel).await;
            let _ = tx.send(Signal::TurnFinished { id, result });
        });
        debug!("turn {id} started");
        self.turn = Some(ActiveTurn { id, cancel });
    }

    fn on_turn_finished(&mut self, id: u64, result: Result<TurnOutcome>) {
        let Some(turn) = self.turn.as_ref().filter(|t| t.id == id) else {
            debug!("ignoring stale turn {id}");
            return;
        };
        match result {
            Ok(TurnOutcome::Reply(reply)) => {
                self.history = reply.history;
                trim_history(&mut self.history, self.config.conversation.max_history_messages);
                let token = turn.cancel.child_token();
                self.supersede_playback();
                let handle = self.playback.play_stream_interruptible(reply.speech, token);
                self.track_playback(&handle);
            }
            Ok(TurnOutcome::Silent) => {
                debug!("turn {id}: nothing to say");
                self.turn = None;
            }
            Ok(TurnOutcome::Cancelled) => self.turn = None,
            Err(e) => {
                error!("turn {id} failed: {e}");
                self.emit(RuntimeEvent::TurnFailed(e.to_string()));
                self.turn = None;
            }
        }
    }

    fn after_readiness_change(&mut self, before: Readiness) {
        let now = self.detector.readiness();
        if now == before {
            return;
        }
        self.emit(RuntimeEvent::Readiness(now));
        if matches!(now, Readiness::Ready { .. }) && !self.announced {
            self.announced = true;
            info!("wake word ready: startup announcement may play");
            self.emit(RuntimeEvent::StartupAnnouncementReady);
            if let Some(text) = self.config.conversation.startup_announcement.clone() {
                let speech = self.collaborators.synthesizer.synthesize(&text);
                self.supersede_playback();
                let handle = self
                    .playback
                    .play_stream_interruptible(speech, self.shutdown.child_token());
                self.track_playback(&handle);
            }
        }
    }

    /// Stop whatever interruptible audio is playing before a new playback replaces it.
    fn supersede_playback(&mut self) {
        if self.playback.cancel_active()
            && self.playback_state.state() == PlaybackStatus::Playing
        {
            self.transition_playback(PlaybackEvent::Interrupted);
        }
    }

    /// Move to `playing` and report the handle's completion as a signal.
    fn track_playback(&mut self, handle: &PlaybackHandle) {
        if self.playback_state.state() == PlaybackStatus::Playing {
            // Overlapping a non-interruptible clip: the newer playback takes over.
            self.transition_playback(PlaybackEvent::Interrupted);
        }
        self.cooldown_until = None;
        self.transition_playback(PlaybackEvent::Started);

        let id = handle.id();
        let completion = handle.completion();
        let tx = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = completion.await;
            let _ = tx.send(Signal::PlaybackFinished { id, outcome });
        });
    }

    fn transition_playback(&mut self, event: PlaybackEvent) -> bool {
        match self.playback_state.apply(event) {
            Ok(state) => {
                self.emit(RuntimeEvent::Playback(state));
                true
            }
            Err(e) => {
                debug!("{e}");
                false
            }
        }
    }

    fn turn_context(&self) -> TurnContext {
        let conversation = &self.config.conversation;
        TurnContext {
            transcriber: Arc::clone(&self.collaborators.transcriber),
            assistant: Arc::clone(&self.collaborators.assistant),
            synthesizer: Arc::clone(&self.collaborators.synthesizer),
            tools: self.tools.clone(),
            system_prompt: conversation.system_prompt.clone(),
            max_tool_rounds: conversation.max_tool_rounds,
            no_speech_reply: conversation.no_speech_reply.clone(),
            runtime_tx: self.runtime_tx.clone(),
        }
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}
