//! The three small state machines that make up pipeline state.
//!
//! Wake word readiness, recording status and playback status change on
//! different events, so each is its own machine with guarded transitions.
//! An event that is not valid in the current state is rejected, never
//! queued.

use std::fmt::Debug;

/// A state type with a guarded transition function.
pub trait Transitions: Copy + Debug + PartialEq {
    /// Events accepted by this machine.
    type Event: Copy + Debug;

    /// Name used in rejection reports and logs.
    const NAME: &'static str;

    /// The state after `event`, or `None` if the event is invalid here.
    fn next(self, event: Self::Event) -> Option<Self>;
}

/// An event arrived in a state that does not accept it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{machine}: {event} rejected in state {from}")]
pub struct TransitionRejected {
    /// Machine that rejected the event.
    pub machine: &'static str,
    /// State at the time of the event.
    pub from: String,
    /// The rejected event.
    pub event: String,
}

/// Holds the current state of one machine.
#[derive(Debug, Clone)]
pub struct Machine<S: Transitions> {
    state: S,
}

impl<S: Transitions> Machine<S> {
    /// Start a machine in `initial`.
    pub fn new(initial: S) -> Self {
        Self { state: initial }
    }

    /// Current state.
    pub fn state(&self) -> S {
        self.state
    }

    /// Apply `event`, returning the new state or the rejection.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionRejected`] and leaves the state unchanged when the
    /// event is not valid in the current state.
    pub fn apply(&mut self, event: S::Event) -> Result<S, TransitionRejected> {
        match self.state.next(event) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => Err(TransitionRejected {
                machine: S::NAME,
                from: format!("{:?}", self.state),
                event: format!("{event:?}"),
            }),
        }
    }
}

// ── Wake word readiness ─────────────────────────────────────────────

/// Whether wake word detections can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Feature buffers are still filling.
    Cold,
    /// Buffers are full; scores are not yet stable.
    WarmingUp,
    /// Detections are trusted. `degraded` is set when warm-up timed out.
    Ready { degraded: bool },
}

/// Events driving [`Readiness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessEvent {
    /// Both detector buffers filled for the first time.
    BuffersFilled,
    /// The stabilization period elapsed.
    Stabilized,
    /// The warm-up wait ran out before stabilization.
    WarmupTimedOut,
}

impl Transitions for Readiness {
    type Event = ReadinessEvent;
    const NAME: &'static str = "readiness";

    fn next(self, event: ReadinessEvent) -> Option<Self> {
        match (self, event) {
            (Self::Cold, ReadinessEvent::BuffersFilled) => Some(Self::WarmingUp),
            (Self::WarmingUp, ReadinessEvent::Stabilized) => Some(Self::Ready { degraded: false }),
            (Self::Cold | Self::WarmingUp, ReadinessEvent::WarmupTimedOut) => {
                Some(Self::Ready { degraded: true })
            }
            _ => None,
        }
    }
}

/// Readiness machine.
pub type ReadinessMachine = Machine<Readiness>;

impl Default for ReadinessMachine {
    fn default() -> Self {
        Self::new(Readiness::Cold)
    }
}

// ── Recording ───────────────────────────────────────────────────────

/// Recording status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    /// No session.
    Idle,
    /// A session is live and accumulating audio.
    Recording,
    /// The session ended and is being handed off.
    Finalizing,
}

/// Events driving [`RecordingStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingEvent {
    /// Wake word trigger.
    Trigger,
    /// VAD decided to stop.
    Stop,
    /// The finalized buffer was handed to the coordinator.
    HandedOff,
}

impl Transitions for RecordingStatus {
    type Event = RecordingEvent;
    const NAME: &'static str = "recording";

    fn next(self, event: RecordingEvent) -> Option<Self> {
        match (self, event) {
            (Self::Idle, RecordingEvent::Trigger) => Some(Self::Recording),
            (Self::Recording, RecordingEvent::Stop) => Some(Self::Finalizing),
            (Self::Finalizing, RecordingEvent::HandedOff) => Some(Self::Idle),
            _ => None,
        }
    }
}

/// Recording machine.
pub type RecordingMachine = Machine<RecordingStatus>;

impl Default for RecordingMachine {
    fn default() -> Self {
        Self::new(RecordingStatus::Idle)
    }
}

// ── Playback ────────────────────────────────────────────────────────

/// Playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// Nothing playing.
    Idle,
    /// Audio output in progress.
    Playing,
    /// Playback ended recently. Interruptible by a wake word.
    Cooldown,
}

/// Events driving [`PlaybackStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A playback started.
    Started,
    /// The current playback settled (completed, cancelled or failed).
    Finished,
    /// A wake word interrupted playback or cooldown.
    Interrupted,
    /// The cooldown period elapsed.
    CooldownElapsed,
}

impl Transitions for PlaybackStatus {
    type Event = PlaybackEvent;
    const NAME: &'static str = "playback";

    fn next(self, event: PlaybackEvent) -> Option<Self> {
        match (self, event) {
            (Self::Idle | Self::Cooldown, PlaybackEvent::Started) => Some(Self::Playing),
            (Self::Playing, PlaybackEvent::Finished) => Some(Self::Cooldown),
            (Self::Playing | Self::Cooldown, PlaybackEvent::Interrupted) => Some(Self::Idle),
            (Self::Cooldown, PlaybackEvent::CooldownElapsed) => Some(Self::Idle),
            _ => None,
        }
    }
}

/// Playback machine.
pub type PlaybackMachine = Machine<PlaybackStatus>;

impl Default for PlaybackMachine {
    fn default() -> Self {
        Self::new(PlaybackStatus::Idle)
    }
}
