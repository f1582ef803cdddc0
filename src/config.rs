//! Configuration types for the voice pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the voice pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarkConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Wake word detection and warm-up.
    pub wakeword: WakewordConfig,
    /// Voice activity detection for ending a recording.
    pub vad: VadConfig,
    /// Audio retained from before a wake word trigger.
    pub preroll: PreRollConfig,
    /// Playback behaviour (cooldown, feedback tone).
    pub playback: PlaybackConfig,
    /// Conversation behaviour for the assistant round trip.
    pub conversation: ConversationConfig,
    /// External tool server connection.
    pub tools: ToolsConfig,
    /// OpenAI-compatible provider used for STT, chat and TTS.
    pub provider: ProviderConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Pipeline (input) sample rate in Hz. Captured audio is converted to this rate.
    pub input_sample_rate: u32,
    /// Output sample rate in Hz.
    pub output_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Capacity of the capture → pipeline chunk channel.
    pub channel_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            input_device: None,
            output_device: None,
            channel_capacity: 64,
        }
    }
}

/// Wake word detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakewordConfig {
    /// Detection threshold (0.0–1.0). A chunk triggers when its score reaches this.
    ///
    /// The built-in template model scores `1 / (1 + dtw_distance)`:
    ///   - 0.3: very lenient (more false positives)
    ///   - 0.5: balanced (default)
    ///   - 0.7: strict (may miss quiet speech)
    pub threshold: f32,
    /// Directory containing reference WAV recordings of the wake word (16kHz mono).
    pub references_dir: PathBuf,
    /// Number of cepstral coefficients per embedding.
    pub num_mfcc: usize,
    /// Label reported with every detection.
    pub label: String,
    /// Stabilization period after the feature buffers fill, in ms of audio.
    ///
    /// Detections are suppressed until this much audio has been scored.
    pub warmup_ms: u32,
    /// Wall-clock bound on waiting for warm-up, from the first audio chunk.
    ///
    /// When exceeded the pipeline proceeds in a degraded mode and trusts
    /// the detector anyway.
    pub warmup_timeout_ms: u32,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            references_dir: default_data_dir().join("wakeword"),
            num_mfcc: 13,
            label: "hey hark".to_owned(),
            warmup_ms: 2_500,
            warmup_timeout_ms: 10_000,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy at or below which a batch counts as silence.
    ///
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.005: very sensitive
    ///   - 0.01:  normal (default)
    ///   - 0.02:  noisy environments
    pub silence_threshold: f32,
    /// A session younger than this that has not heard speech never stops on silence.
    pub grace_period_ms: u32,
    /// Contiguous silence needed to end a session.
    pub trailing_silence_ms: u32,
    /// Minimum recorded duration before silence may end a session.
    pub min_speech_ms: u32,
    /// A session stops unconditionally at this duration.
    pub max_recording_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            grace_period_ms: 1_500,
            trailing_silence_ms: 1_200,
            min_speech_ms: 600,
            max_recording_ms: 15_000,
        }
    }
}

/// Pre-roll configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreRollConfig {
    /// Amount of audio preceding a trigger that is seeded into the recording.
    pub duration_ms: u32,
}

impl Default for PreRollConfig {
    fn default() -> Self {
        Self { duration_ms: 300 }
    }
}

/// Playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Cooldown after any playback ends. A wake word may interrupt it.
    pub cooldown_ms: u32,
    /// Play a short tone when a recording starts.
    pub feedback_tone: bool,
    /// Time within which a cancelled playback must settle.
    pub cancel_budget_ms: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 800,
            feedback_tone: true,
            cancel_budget_ms: 100,
        }
    }
}

/// Conversation configuration for the assistant round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// System prompt sent ahead of the running conversation.
    pub system_prompt: String,
    /// Maximum number of user/assistant/tool messages kept as context.
    pub max_history_messages: usize,
    /// Maximum assistant ↔ tool rounds per utterance.
    pub max_tool_rounds: usize,
    /// Spoken once the wake word detector is first ready.
    pub startup_announcement: Option<String>,
    /// Spoken when an utterance transcribes to nothing.
    pub no_speech_reply: Option<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a voice assistant. Keep responses short and conversational; \
                            they will be spoken aloud."
                .to_owned(),
            max_history_messages: 20,
            max_tool_rounds: 5,
            startup_announcement: None,
            no_speech_reply: Some("Sorry, I didn't catch that.".to_owned()),
        }
    }
}

/// External tool server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Whether to connect to the tool server at startup.
    pub enabled: bool,
    /// Program that serves tools over stdio.
    pub command: String,
    /// Arguments for `command`.
    pub args: Vec<String>,
    /// Connection attempts before giving up.
    pub max_attempts: u32,
    /// Backoff unit: attempt `k` (k > 1) waits `base_delay_ms * (k - 1)`.
    pub base_delay_ms: u64,
    /// Hard ceiling on cumulative backoff delay.
    pub ceiling_ms: u64,
    /// Bound on a single connection attempt (spawn + handshake + listing).
    pub attempt_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "python3".to_owned(),
            args: vec!["scrips/mqtt-mcp-stdio.py".to_owned()],
            max_attempts: 3,
            base_delay_ms: 2_000,
            ceiling_ms: 6_000,
            attempt_timeout_ms: 5_000,
        }
    }
}

/// OpenAI-compatible provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub api_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Chat completion model.
    pub chat_model: String,
    /// Transcription model.
    pub stt_model: String,
    /// Speech synthesis model.
    pub tts_model: String,
    /// Speech synthesis voice.
    pub tts_voice: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
            chat_model: "gpt-4o-mini".to_owned(),
            stt_model: "whisper-1".to_owned(),
            tts_model: "tts-1".to_owned(),
            tts_voice: "alloy".to_owned(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is missing or empty.
    pub fn api_key(&self) -> crate::error::Result<String> {
        let value = std::env::var(&self.api_key_env).map_err(|_| {
            crate::error::HarkError::Config(format!(
                "provider API key env var is missing: {}",
                self.api_key_env
            ))
        })?;
        if value.trim().is_empty() {
            return Err(crate::error::HarkError::Config(format!(
                "provider API key env var is empty: {}",
                self.api_key_env
            )));
        }
        Ok(value)
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(data) = std::env::var_os("XDG_DATA_HOME") {
        PathBuf::from(data).join("hark")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local").join("share").join("hark")
    } else {
        PathBuf::from("/tmp").join("hark")
    }
}

/// Convert a duration in milliseconds to a sample count at `sample_rate`.
pub fn ms_to_samples(sample_rate: u32, ms: u32) -> usize {
    ((ms as u64 * sample_rate as u64) / 1000) as usize
}

impl HarkConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::HarkError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::HarkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/hark/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("hark").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("hark")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/hark-config/config.toml")
        }
    }

    /// Check cross-field constraints that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HarkError::Config`] describing the first violation.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::HarkError;

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(HarkError::Config("sample rates must be non-zero".into()));
        }
        if self.audio.channel_capacity == 0 {
            return Err(HarkError::Config(
                "audio.channel_capacity must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.wakeword.threshold) {
            return Err(HarkError::Config(format!(
                "wakeword.threshold must be within 0..=1, got {}",
                self.wakeword.threshold
            )));
        }
        if self.vad.min_speech_ms > self.vad.max_recording_ms {
            return Err(HarkError::Config(format!(
                "vad.min_speech_ms ({}) exceeds vad.max_recording_ms ({})",
                self.vad.min_speech_ms, self.vad.max_recording_ms
            )));
        }
        if self.tools.max_attempts == 0 {
            return Err(HarkError::Config("tools.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}
