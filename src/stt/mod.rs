//! Speech-to-text boundary.
//!
//! The pipeline hands a finalized [`Utterance`] to a [`Transcriber`] and
//! gets text back. [`OpenAiTranscriber`] uploads the audio as a 16-bit WAV
//! to any OpenAI-compatible `/v1/audio/transcriptions` endpoint.

use crate::config::ProviderConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::Utterance;
use async_trait::async_trait;
use std::io::Cursor;
use tracing::{debug, info};

/// Turns recorded speech into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `utterance`. An empty string means no speech was recognized.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Transcription`] when the collaborator fails.
    async fn transcribe(&self, utterance: &Utterance) -> Result<String>;
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper-style transcription over HTTP.
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
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
            url: endpoint(&config.api_url, "audio/transcriptions"),
            api_key: api_key.into(),
            model: config.stt_model.clone(),
        }
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        let wav = encode_wav(&utterance.samples, utterance.sample_rate)?;
        debug!("uploading {} bytes of audio for transcription", wav.len());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| HarkError::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarkError::Transcription(format!("API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await?;
        let text = result.text.trim().to_owned();
        info!("transcribed: {text}");
        Ok(text)
    }
}

/// Encode mono f32 samples as a 16-bit PCM WAV file in memory.
///
/// # Errors
///
/// Returns [`HarkError::Transcription`] if the encoder fails.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| HarkError::Transcription(format!("wav encode: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| HarkError::Transcription(format!("wav encode: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| HarkError::Transcription(format!("wav encode: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Join an OpenAI-style base URL and a `/v1/...` path.
pub(crate) fn endpoint(api_url: &str, path: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{base}/v1/{path}")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn wav_header_and_length() {
        let wav = encode_wav(&[0.0, 0.5, -0.5, 1.0], 16_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 8);

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[3], i16::MAX);
    }

    #[test]
    fn endpoint_handles_v1_suffix_and_slashes() {
        assert_eq!(
            endpoint("https://api.openai.com/v1", "audio/transcriptions"),
            "https://api.openai.com/v1/audio/transcriptions"
        );
        assert_eq!(
            endpoint("http://localhost:8080/", "chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
