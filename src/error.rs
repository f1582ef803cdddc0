//! Error types for the hark voice pipeline.

/// Top-level error type for the voice pipeline.
///
/// Only [`HarkError::Device`] at startup is fatal to the pipeline. Every
/// other variant is handled where it occurs (a skipped chunk, a degraded
/// tool set, a spoken apology) and never unwinds the audio loop.
#[derive(Debug, thiserror::Error)]
pub enum HarkError {
    /// Microphone or speaker unavailable.
    #[error("audio device error: {0}")]
    Device(String),

    /// Wake word scoring failed for a single chunk.
    #[error("detection error: {0}")]
    Detection(String),

    /// A bounded wait (warm-up, connection ceiling, attempt) ran out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Speech-to-text collaborator error.
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Conversational assistant collaborator error.
    #[error("assistant error: {0}")]
    Assistant(String),

    /// Speech synthesis collaborator error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio output failed after the device was opened.
    #[error("playback error: {0}")]
    Playback(String),

    /// Tool server protocol or invocation error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Channel send/receive error between pipeline tasks.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HarkError>;
