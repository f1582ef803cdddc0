//! HTTP contract tests for the OpenAI-compatible collaborators.

use futures_util::StreamExt;
use hark::config::ProviderConfig;
use hark::llm::{Assistant, AssistantReply, ChatMessage, OpenAiAssistant};
use hark::pipeline::messages::Utterance;
use hark::stt::{OpenAiTranscriber, Transcriber};
use hark::tools::ToolDescriptor;
use hark::tts::{OpenAiSynthesizer, SpeechSynthesizer};
use hark::vad::StopReason;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        api_url: format!("{}/v1", server.uri()),
        ..ProviderConfig::default()
    }
}

fn lamp_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: "mqtt_publish".into(),
        description: "Publish a message".into(),
        input_schema: json!({"type": "object", "properties": {"topic": {}, "payload": {}}}),
    }
}

#[tokio::test]
async fn chat_request_carries_messages_and_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "lamp on"}],
            "tools": [{"type": "function", "function": {"name": "mqtt_publish"}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Done."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let assistant = OpenAiAssistant::with_api_key(&provider(&server), "test-key");
    let reply = assistant
        .respond(&[ChatMessage::user("lamp on")], &[lamp_tool()])
        .await
        .unwrap();
    assert_eq!(reply, AssistantReply::Text("Done.".into()));
}

#[tokio::test]
async fn chat_error_status_is_assistant_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let assistant = OpenAiAssistant::with_api_key(&provider(&server), "test-key");
    let err = assistant
        .respond(&[ChatMessage::user("hi")], &[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("overloaded"), "{err}");
}

#[tokio::test]
async fn transcription_returns_trimmed_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "  turn on the lamp \n"})))
        .expect(1)
        .mount(&server)
        .await;

    let transcriber = OpenAiTranscriber::with_api_key(&provider(&server), "test-key");
    let utterance = Utterance {
        samples: vec![0.1; 16_000],
        sample_rate: 16_000,
        preroll_samples: 4_800,
        reason: StopReason::Silence,
    };
    assert_eq!(transcriber.transcribe(&utterance).await.unwrap(), "turn on the lamp");
}

#[tokio::test]
async fn speech_streams_pcm_as_clips() {
    let server = MockServer::start().await;
    let pcm: Vec<u8> = [0i16, 16_384, -16_384, i16::MAX]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({"input": "Done.", "response_format": "pcm"})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm))
        .expect(1)
        .mount(&server)
        .await;

    let synthesizer = OpenAiSynthesizer::with_api_key(&provider(&server), "test-key");
    let clips: Vec<_> = synthesizer.synthesize("Done.").collect().await;
    let samples: Vec<f32> = clips
        .into_iter()
        .flat_map(|c| c.unwrap().samples.to_vec())
        .collect();
    assert_eq!(samples.len(), 4);
    assert!((samples[1] - 0.5).abs() < 1e-4);
    assert!((samples[2] + 0.5).abs() < 1e-4);
}

#[tokio::test]
async fn speech_error_surfaces_as_stream_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let synthesizer = OpenAiSynthesizer::with_api_key(&provider(&server), "test-key");
    let first = synthesizer.synthesize("hi").next().await.unwrap();
    assert!(first.is_err());
}
