//! Cancellable audio playback.
//!
//! [`PlaybackController`] hands out at most one live [`PlaybackHandle`] at
//! a time. Each handle carries a cancel right and a completion future that
//! settles exactly once with a [`PlaybackOutcome`]. Cancellation is an
//! outcome, never an error.

use crate::audio::{Direction, device_names, open_device, resample_linear};
use crate::config::AudioConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::AudioClip;
use crate::tts::SynthesisStream;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use futures_util::future::{BoxFuture, Shared};
use futures_util::{FutureExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// How often the blocking playback loop checks for drain or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a sink stopped writing a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEnd {
    /// Every sample was played.
    Drained,
    /// Output stopped early because the token was cancelled.
    Stopped,
}

/// Audio output device boundary.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Play `clip`, returning early once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Playback`] or [`HarkError::Device`] when output fails.
    async fn play(&self, clip: AudioClip, cancel: CancellationToken) -> Result<SinkEnd>;

    /// Play clips as they arrive, returning early once `cancel` fires.
    ///
    /// The default plays each clip with [`AudioSink::play`]. Device sinks
    /// override it to keep one output stream open across clips.
    ///
    /// # Errors
    ///
    /// Returns the first synthesis error in `clips`, or the sink's output error.
    async fn play_stream(
        &self,
        mut clips: SynthesisStream,
        cancel: CancellationToken,
    ) -> Result<SinkEnd> {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(SinkEnd::Stopped),
                next = clips.next() => next,
            };
            let Some(clip) = next else {
                return Ok(SinkEnd::Drained);
            };
            let clip = clip?;
            if clip.samples.is_empty() {
                continue;
            }
            if self.play(clip, cancel.clone()).await? == SinkEnd::Stopped {
                return Ok(SinkEnd::Stopped);
            }
        }
    }
}

/// Final state of one playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// All audio was played.
    Completed,
    /// The handle (or shutdown) cancelled it.
    Cancelled,
    /// Output or synthesis failed.
    Failed(String),
}

impl PlaybackOutcome {
    /// Whether playback ended through cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// One in-flight audio output operation.
#[derive(Clone)]
pub struct PlaybackHandle {
    id: u64,
    cancel: Option<CancellationToken>,
    /// Stops output regardless of the cancel right; used when a newer playback takes over.
    stop: CancellationToken,
    current: Arc<AtomicU64>,
    completion: Shared<BoxFuture<'static, PlaybackOutcome>>,
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("id", &self.id)
            .field("interruptible", &self.cancel.is_some())
            .finish()
    }
}

impl PlaybackHandle {
    /// Identifier, unique per controller.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this handle was created interruptible.
    pub fn is_interruptible(&self) -> bool {
        self.cancel.is_some()
    }

    /// Cancel this playback.
    ///
    /// Returns `false` when the handle is not interruptible or a newer
    /// playback has since replaced it.
    pub fn cancel(&self) -> bool {
        let Some(token) = &self.cancel else {
            return false;
        };
        if self.current.load(Ordering::SeqCst) != self.id {
            return false;
        }
        token.cancel();
        true
    }

    /// Future settling once with the outcome. Every clone observes the same result.
    pub fn completion(&self) -> Shared<BoxFuture<'static, PlaybackOutcome>> {
        self.completion.clone()
    }

    /// The outcome, if playback has already settled.
    pub fn outcome(&self) -> Option<PlaybackOutcome> {
        self.completion.peek().cloned()
    }
}

/// Owns the audio sink and the single active playback.
pub struct PlaybackController {
    sink: Arc<dyn AudioSink>,
    current: Arc<AtomicU64>,
    next_id: u64,
    active: Option<PlaybackHandle>,
    shutdown: CancellationToken,
}

impl PlaybackController {
    /// Create a controller over `sink`. Cancelling `shutdown` stops every playback.
    pub fn new(sink: Arc<dyn AudioSink>, shutdown: CancellationToken) -> Self {
        Self {
            sink,
            current: Arc::new(AtomicU64::new(0)),
            next_id: 0,
            active: None,
            shutdown,
        }
    }

    /// Play a clip that cannot be interrupted (feedback tones).
    pub fn play(&mut self, clip: AudioClip) -> PlaybackHandle {
        let token = self.shutdown.child_token();
        self.start(clip_stream(clip), token, false)
    }

    /// Play a clip that a wake word may interrupt.
    pub fn play_interruptible(&mut self, clip: AudioClip) -> PlaybackHandle {
        let token = self.shutdown.child_token();
        self.start(clip_stream(clip), token, true)
    }

    /// Play synthesized speech as it streams in.
    ///
    /// `cancel` governs both synthesis and output: cancelling it drops the
    /// stream (aborting synthesis) and stops the sink together.
    pub fn play_stream_interruptible(
        &mut self,
        stream: SynthesisStream,
        cancel: CancellationToken,
    ) -> PlaybackHandle {
        self.start(stream, cancel, true)
    }

    /// The active playback, if any.
    pub fn active(&self) -> Option<&PlaybackHandle> {
        self.active.as_ref()
    }

    /// Cancel the active playback if it is interruptible.
    pub fn cancel_active(&mut self) -> bool {
        let cancelled = self.active.as_ref().is_some_and(PlaybackHandle::cancel);
        if cancelled {
            self.active = None;
        }
        cancelled
    }

    /// Forget the active handle once its completion with `id` has been observed.
    pub fn settled(&mut self, id: u64) {
        if self.active.as_ref().is_some_and(|h| h.id == id) {
            self.active = None;
        }
    }

    fn start(
        &mut self,
        stream: SynthesisStream,
        token: CancellationToken,
        interruptible: bool,
    ) -> PlaybackHandle {
        self.next_id += 1;
        let id = self.next_id;
        // Invalidates cancel rights on every older handle.
        self.current.store(id, Ordering::SeqCst);
        // One output at a time: a still-sounding older clip is cut off.
        if let Some(previous) = self.active.take() {
            previous.stop.cancel();
        }

        let sink = Arc::clone(&self.sink);
        let shutdown = self.shutdown.clone();
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    task_token.cancel();
                    PlaybackOutcome::Cancelled
                }
                outcome = drive(sink, stream, task_token.clone()) => outcome,
            }
        });
        let completion = async move {
            join.await
                .unwrap_or_else(|e| PlaybackOutcome::Failed(format!("playback task: {e}")))
        }
        .boxed()
        .shared();

        let handle = PlaybackHandle {
            id,
            cancel: interruptible.then(|| token.clone()),
            stop: token,
            current: Arc::clone(&self.current),
            completion,
        };
        debug!("playback {id} started (interruptible: {interruptible})");
        self.active = Some(handle.clone());
        handle
    }
}

fn clip_stream(clip: AudioClip) -> SynthesisStream {
    futures_util::stream::once(async move { Ok(clip) }).boxed()
}

/// Play `stream` on the sink until drained or cancelled.
async fn drive(
    sink: Arc<dyn AudioSink>,
    stream: SynthesisStream,
    token: CancellationToken,
) -> PlaybackOutcome {
    let played = tokio::select! {
        biased;
        () = token.cancelled() => return PlaybackOutcome::Cancelled,
        played = sink.play_stream(stream, token.clone()) => played,
    };
    match played {
        Ok(SinkEnd::Drained) => PlaybackOutcome::Completed,
        Ok(SinkEnd::Stopped) => PlaybackOutcome::Cancelled,
        Err(e) => {
            error!("playback failed: {e}");
            PlaybackOutcome::Failed(e.to_string())
        }
    }
}

// ── cpal output ─────────────────────────────────────────────────────

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    device: cpal::Device,
    stream_config: StreamConfig,
}

impl CpalPlayback {
    /// Open the configured output device, or the default one.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Device`] if no output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let device = open_device(Direction::Output, config.output_device.as_deref())?;
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        device_names(Direction::Output)
    }
}

#[async_trait]
impl AudioSink for CpalPlayback {
    async fn play(&self, clip: AudioClip, cancel: CancellationToken) -> Result<SinkEnd> {
        self.play_stream(clip_stream(clip), cancel).await
    }

    async fn play_stream(
        &self,
        mut clips: SynthesisStream,
        cancel: CancellationToken,
    ) -> Result<SinkEnd> {
        let queue = Arc::new(Mutex::new(OutputQueue::default()));
        // Cancelled by the caller, or by us when synthesis fails.
        let stop = cancel.child_token();

        let device = self.device.clone();
        let stream_config = self.stream_config.clone();
        let output_rate = stream_config.sample_rate;
        let output_queue = Arc::clone(&queue);
        let output_stop = stop.clone();
        let mut output = tokio::task::spawn_blocking(move || {
            run_output(&device, &stream_config, &output_queue, &output_stop)
        });

        let fed = tokio::select! {
            fed = feed_queue(&mut clips, &queue, output_rate, &stop) => fed,
            // Output ended first: cancelled or the device failed.
            ended = &mut output => return join_output(ended),
        };
        lock_queue(&queue)?.close();
        if fed.is_err() {
            stop.cancel();
        }
        let end = join_output(output.await);
        fed.and(end)
    }
}

/// Resample clips from `clips` into `queue` until the stream ends or `stop` fires.
async fn feed_queue(
    clips: &mut SynthesisStream,
    queue: &Mutex<OutputQueue>,
    output_rate: u32,
    stop: &CancellationToken,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(()),
            next = clips.next() => next,
        };
        let Some(clip) = next else {
            return Ok(());
        };
        let clip = clip?;
        let samples = resample_linear(&clip.samples, clip.sample_rate, output_rate);
        lock_queue(queue)?.push(&samples);
    }
}

fn lock_queue(queue: &Mutex<OutputQueue>) -> Result<std::sync::MutexGuard<'_, OutputQueue>> {
    queue
        .lock()
        .map_err(|e| HarkError::Playback(format!("playback queue lock poisoned: {e}")))
}

fn join_output(
    joined: std::result::Result<Result<SinkEnd>, tokio::task::JoinError>,
) -> Result<SinkEnd> {
    joined.map_err(|e| HarkError::Playback(format!("playback thread failed: {e}")))?
}

/// Run one output stream fed from `queue`, blocking until drained or stopped.
fn run_output(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    queue: &Arc<Mutex<OutputQueue>>,
    stop: &CancellationToken,
) -> Result<SinkEnd> {
    let callback_queue = Arc::clone(queue);
    let callback_stop = stop.clone();

    let stream = device
        .build_output_stream(
            stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                // Silence within one callback of cancellation.
                if callback_stop.is_cancelled() {
                    data.fill(0.0);
                    return;
                }
                match callback_queue.lock() {
                    Ok(mut queue) => queue.fill(data),
                    Err(_) => data.fill(0.0),
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| HarkError::Device(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| HarkError::Device(format!("failed to start output stream: {e}")))?;

    let end = loop {
        std::thread::sleep(POLL_INTERVAL);
        if stop.is_cancelled() {
            break SinkEnd::Stopped;
        }
        if lock_queue(queue)?.is_drained() {
            break SinkEnd::Drained;
        }
    };

    drop(stream);
    Ok(end)
}

/// Samples waiting for the output callback.
///
/// Stays open across clips so streamed speech plays on one device stream.
/// An underrun before [`OutputQueue::close`] plays silence and keeps waiting.
#[derive(Debug, Default)]
struct OutputQueue {
    samples: VecDeque<f32>,
    closed: bool,
}

impl OutputQueue {
    fn push(&mut self, samples: &[f32]) {
        self.samples.extend(samples);
    }

    /// No more samples will be pushed.
    fn close(&mut self) {
        self.closed = true;
    }

    /// Fill one device buffer, padding with silence.
    fn fill(&mut self, data: &mut [f32]) {
        for sample in data.iter_mut() {
            *sample = self.samples.pop_front().unwrap_or(0.0);
        }
    }

    fn is_drained(&self) -> bool {
        self.closed && self.samples.is_empty()
    }
}
