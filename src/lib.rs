//! Hark: an interruptible wake-word voice pipeline.
//!
//! Microphone audio flows through a wake word detector with a warm-up
//! protocol, a pre-roll window and an energy VAD into discrete utterances.
//! Each utterance is transcribed, answered by an assistant that may call
//! tools on an external tool server, synthesized and played back. Playback
//! can be interrupted at any time by saying the wake word again.
//!
//! # Architecture
//!
//! - **Audio**: capture and playback via `cpal`, pre-roll, feedback tones
//! - **Wake word**: log-mel front end + reference-template model
//! - **VAD**: grace period, trailing silence and max-length rules
//! - **Pipeline**: three small state machines driven by one audio loop
//! - **Collaborators**: OpenAI-compatible STT, chat and TTS over HTTP
//! - **Tools**: stdio JSON-RPC tool server with bounded retry

pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod stt;
pub mod tools;
pub mod tts;
pub mod vad;
pub mod wakeword;

pub use config::HarkConfig;
pub use error::{HarkError, Result};
pub use pipeline::coordinator::{Collaborators, PipelineCoordinator, Signal};
pub use runtime::RuntimeEvent;
pub use wakeword::WakeWordDetector;
