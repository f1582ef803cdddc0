//! Shared test doubles and signal generators for integration tests.

use async_trait::async_trait;
use futures_util::StreamExt;
use hark::audio::playback::SinkEnd;
use hark::audio::{AudioSink, tone};
use hark::config::ms_to_samples;
use hark::llm::{Assistant, AssistantReply, ChatMessage};
use hark::pipeline::messages::{AudioChunk, AudioClip, Utterance};
use hark::stt::Transcriber;
use hark::tools::{AttemptError, ToolConnection, ToolConnector, ToolDescriptor};
use hark::tts::{SpeechSynthesizer, SynthesisStream};
use hark::wakeword::{CHUNK_SIZE, WakewordModel};
use hark::{
    Collaborators, HarkConfig, HarkError, PipelineCoordinator, Result, RuntimeEvent, Signal,
    WakeWordDetector,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

pub(crate) const RATE: u32 = 16_000;

/// Log-mel level separating silence (about -23) from a clearly audible tone.
const LOUD_LOG_MEL: f32 = -10.0;

// ── signals ─────────────────────────────────────────────────────────

pub(crate) fn silence(ms: u32) -> Vec<f32> {
    vec![0.0; ms_to_samples(RATE, ms)]
}

pub(crate) fn sine(freq_hz: f32, ms: u32, amplitude: f32) -> Vec<f32> {
    (0..ms_to_samples(RATE, ms))
        .map(|i| (2.0 * std::f32::consts::PI * freq_hz * i as f32 / RATE as f32).sin() * amplitude)
        .collect()
}

/// One wake word chunk of loud tone.
pub(crate) fn trigger() -> Vec<f32> {
    sine(880.0, 80, 0.5)
}

// ── wake word ───────────────────────────────────────────────────────

/// Scores 0.95 when the newest chunk is loud, 0.05 otherwise.
pub(crate) struct LoudnessModel;

impl WakewordModel for LoudnessModel {
    fn label(&self) -> &str {
        "test word"
    }

    fn embed(&mut self, mel_window: &[Vec<f32>]) -> Result<Vec<f32>> {
        let newest = &mel_window[mel_window.len().saturating_sub(8)..];
        let peak = newest.iter().flatten().copied().fold(f32::MIN, f32::max);
        Ok(vec![peak])
    }

    fn classify(&mut self, embeddings: &[Vec<f32>]) -> Result<f32> {
        let latest = embeddings
            .last()
            .and_then(|e| e.first())
            .copied()
            .unwrap_or(f32::MIN);
        Ok(if latest > LOUD_LOG_MEL { 0.95 } else { 0.05 })
    }
}

pub(crate) fn detector(config: &HarkConfig) -> WakeWordDetector {
    WakeWordDetector::new(Box::new(LoudnessModel), &config.wakeword, RATE).unwrap()
}

// ── audio output ────────────────────────────────────────────────────

/// Records every clip. Plays in real time when `realtime`, else drains at once.
#[derive(Default)]
pub(crate) struct MemorySink {
    pub clips: Mutex<Vec<AudioClip>>,
    pub realtime: bool,
}

#[async_trait]
impl AudioSink for MemorySink {
    async fn play(&self, clip: AudioClip, cancel: CancellationToken) -> Result<SinkEnd> {
        let duration = clip.duration();
        self.clips.lock().unwrap().push(clip);
        if !self.realtime {
            return Ok(SinkEnd::Drained);
        }
        tokio::select! {
            () = cancel.cancelled() => Ok(SinkEnd::Stopped),
            () = tokio::time::sleep(duration) => Ok(SinkEnd::Drained),
        }
    }
}

// ── collaborators ───────────────────────────────────────────────────

pub(crate) struct ScriptedTranscriber {
    pub text: String,
    pub seen: Mutex<Vec<Utterance>>,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        self.seen.lock().unwrap().push(utterance.clone());
        Ok(self.text.clone())
    }
}

/// Pops scripted replies, answering "ok" once the script runs out.
#[derive(Default)]
pub(crate) struct ScriptedAssistant {
    pub replies: Mutex<VecDeque<AssistantReply>>,
    pub delay: Duration,
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn respond(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDescriptor],
    ) -> Result<AssistantReply> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| AssistantReply::Text("ok".into())))
    }
}

/// Speaks every reply as one tone clip of `ms` milliseconds.
pub(crate) struct ToneSynthesizer {
    pub ms: u32,
}

impl SpeechSynthesizer for ToneSynthesizer {
    fn synthesize(&self, _text: &str) -> SynthesisStream {
        let clip = AudioClip::new(tone::tone(24_000, 440.0, self.ms), 24_000);
        futures_util::stream::iter(vec![Ok(clip)]).boxed()
    }
}

// ── tool server ─────────────────────────────────────────────────────

struct EmptyServer;

#[async_trait]
impl ToolConnection for EmptyServer {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(vec![ToolDescriptor {
            name: "mqtt_publish".into(),
            description: "Publish a message".into(),
            input_schema: serde_json::json!({"properties": {"topic": {}, "payload": {}}}),
        }])
    }

    async fn call_tool(&self, _name: &str, _arguments: serde_json::Value) -> Result<String> {
        Err(HarkError::Tool("not wired".into()))
    }
}

/// Fails the first `failures` attempts, then connects.
pub(crate) struct FlakyConnector {
    pub failures: u32,
    pub calls: AtomicU32,
}

impl FlakyConnector {
    pub(crate) fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolConnector for FlakyConnector {
    async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(AttemptError {
                message: format!("attempt {call}: connection refused"),
                diagnostics: Some(format!("broker unreachable (run {call})")),
            });
        }
        Ok(Arc::new(EmptyServer))
    }
}

// ── pipeline harness ────────────────────────────────────────────────

/// Config with fast, deterministic defaults for pipeline tests.
pub(crate) fn test_config() -> HarkConfig {
    let mut config = HarkConfig::default();
    config.playback.feedback_tone = false;
    config.conversation.no_speech_reply = None;
    config
}

pub(crate) struct Harness {
    pub coordinator: PipelineCoordinator,
    pub signals: mpsc::UnboundedReceiver<Signal>,
    pub events: broadcast::Receiver<RuntimeEvent>,
    pub sink: Arc<MemorySink>,
    pub transcriber: Arc<ScriptedTranscriber>,
}

impl Harness {
    pub(crate) fn new(config: HarkConfig) -> Self {
        Self::with(config, false, ScriptedAssistant::default(), 200)
    }

    pub(crate) fn with(
        config: HarkConfig,
        realtime: bool,
        assistant: ScriptedAssistant,
        reply_ms: u32,
    ) -> Self {
        let sink = Arc::new(MemorySink {
            clips: Mutex::default(),
            realtime,
        });
        let transcriber = Arc::new(ScriptedTranscriber {
            text: "turn on the lamp".into(),
            seen: Mutex::default(),
        });
        let collaborators = Collaborators {
            transcriber: transcriber.clone(),
            assistant: Arc::new(assistant),
            synthesizer: Arc::new(ToneSynthesizer { ms: reply_ms }),
        };
        let (events_tx, events) = broadcast::channel(4096);
        let mut coordinator =
            PipelineCoordinator::new(config.clone(), detector(&config), sink.clone(), collaborators)
                .with_runtime_events(events_tx);
        let signals = coordinator.take_signals().unwrap();
        Self {
            coordinator,
            signals,
            events,
            sink,
            transcriber,
        }
    }

    /// Feed `samples` in wake-word-sized batches.
    pub(crate) fn feed(&mut self, samples: &[f32]) {
        for batch in samples.chunks(CHUNK_SIZE) {
            self.coordinator
                .handle_audio(&AudioChunk::new(batch.to_vec(), RATE));
        }
    }

    /// Feed silence until the detector is ready, at most `limit_ms`.
    pub(crate) fn warm_up(&mut self, limit_ms: u32) {
        let mut fed = 0;
        while !matches!(
            self.coordinator.readiness(),
            hark::pipeline::state::Readiness::Ready { .. }
        ) && fed < limit_ms
        {
            self.feed(&silence(80));
            fed += 80;
        }
    }

    /// Trigger, speak for a second, then fall silent long enough to stop.
    pub(crate) fn speak_command(&mut self) {
        self.feed(&trigger());
        self.feed(&sine(220.0, 1_000, 0.3));
        self.feed(&silence(1_500));
    }

    pub(crate) async fn next_signal(&mut self) -> Signal {
        tokio::time::timeout(Duration::from_secs(5), self.signals.recv())
            .await
            .expect("signal within 5s")
            .expect("signal channel open")
    }

    /// Receive the next signal and apply it.
    pub(crate) async fn pump(&mut self) {
        let signal = self.next_signal().await;
        self.coordinator.handle_signal(signal);
    }

    pub(crate) fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
