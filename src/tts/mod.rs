//! Speech synthesis boundary.
//!
//! Synthesis is a lazy [`SynthesisStream`] of audio clips: nothing is
//! requested until playback polls it, and dropping the stream aborts the
//! request. That is how one cancellation stops synthesis and playback
//! together.

use crate::config::ProviderConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::AudioClip;
use crate::stt::endpoint;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt, TryStreamExt};
use tracing::debug;

/// Incremental synthesized audio.
pub type SynthesisStream = BoxStream<'static, Result<AudioClip>>;

/// Sample rate of OpenAI `pcm` speech output.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Turns reply text into audio.
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesizing `text`. Errors surface as stream items.
    fn synthesize(&self, text: &str) -> SynthesisStream;
}

/// OpenAI-compatible `/v1/audio/speech` client streaming raw PCM.
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl OpenAiSynthesizer {
    /// Build a client from provider settings.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] when the API key is not set.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::with_api_key(config, config.api_key()?))
    }

    /// Build a client with an explicit API key.
    pub fn with_api_key(config: &ProviderConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: endpoint(&config.api_url, "audio/speech"),
            api_key: api_key.into(),
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
        }
    }
}

impl SpeechSynthesizer for OpenAiSynthesizer {
    fn synthesize(&self, text: &str) -> SynthesisStream {
        debug!("synthesizing {} chars", text.len());
        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
                "response_format": "pcm",
            }));

        futures_util::stream::once(async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(HarkError::Synthesis(format!("API error {status}: {body}")));
            }
            Ok::<_, HarkError>(pcm_clips(response.bytes_stream(), PCM_SAMPLE_RATE))
        })
        .try_flatten()
        .boxed()
    }
}

/// Decode a stream of little-endian s16 PCM byte chunks into clips.
pub fn pcm_clips<S>(bytes: S, sample_rate: u32) -> impl Stream<Item = Result<AudioClip>>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>>,
{
    let mut decoder = PcmDecoder::default();
    bytes.map(move |chunk| -> Result<AudioClip> {
        let chunk = chunk?;
        Ok(AudioClip::new(decoder.push(&chunk), sample_rate))
    })
}

/// s16le decoder that carries a split sample across chunk boundaries.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    /// Decode `bytes`, returning every complete sample as f32.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(bytes.len() / 2 + 1);
        let mut rest = bytes;
        if let Some(lo) = self.carry.take() {
            match rest.split_first() {
                Some((&hi, tail)) => {
                    out.push(i16::from_le_bytes([lo, hi]) as f32 / 32768.0);
                    rest = tail;
                }
                None => {
                    self.carry = Some(lo);
                    return out;
                }
            }
        }
        let pairs = rest.chunks_exact(2);
        self.carry = pairs.remainder().first().copied();
        out.extend(pairs.map(|p| i16::from_le_bytes([p[0], p[1]]) as f32 / 32768.0));
        out
    }
}
