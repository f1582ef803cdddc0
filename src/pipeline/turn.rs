//! One assistant round trip: utterance in, speech stream out.
//!
//! A turn runs as its own task, off the audio loop. It transcribes the
//! utterance, lets the assistant call tools for a bounded number of rounds,
//! and returns the reply text with a lazy [`SynthesisStream`] for it. The
//! coordinator plays that stream under a child of the turn's token, so one
//! cancellation stops synthesis and playback together.

use crate::error::{HarkError, Result};
use crate::llm::{Assistant, AssistantReply, ChatMessage, ToolCall};
use crate::pipeline::messages::Utterance;
use crate::runtime::RuntimeEvent;
use crate::stt::Transcriber;
use crate::tools::{ConnectedTools, ToolDescriptor, normalize_arguments};
use crate::tts::{SpeechSynthesizer, SynthesisStream};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a turn needs, cheap to clone into a task.
#[derive(Clone)]
pub struct TurnContext {
    pub transcriber: Arc<dyn Transcriber>,
    pub assistant: Arc<dyn Assistant>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub tools: Option<ConnectedTools>,
    pub system_prompt: String,
    pub max_tool_rounds: usize,
    pub no_speech_reply: Option<String>,
    pub runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
}

/// The spoken answer to one utterance.
pub struct TurnReply {
    /// Text being spoken.
    pub text: String,
    /// Synthesized audio, requested lazily on first poll.
    pub speech: SynthesisStream,
    /// Conversation after this turn, without the system prompt.
    pub history: Vec<ChatMessage>,
}

impl std::fmt::Debug for TurnReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnReply")
            .field("text", &self.text)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Speak this.
    Reply(TurnReply),
    /// Nothing was said and nothing should be answered.
    Silent,
    /// The turn was cancelled (barge-in or shutdown).
    Cancelled,
}

/// Run a turn for `utterance` on top of `history` until it finishes or `cancel` fires.
///
/// # Errors
///
/// Returns the first collaborator failure (transcription, assistant), or
/// [`HarkError::Assistant`] when the tool round limit passes without a text reply.
pub async fn run_turn(
    ctx: TurnContext,
    utterance: Utterance,
    history: Vec<ChatMessage>,
    cancel: CancellationToken,
) -> Result<TurnOutcome> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!("turn cancelled");
            Ok(TurnOutcome::Cancelled)
        }
        outcome = converse(&ctx, &utterance, history) => outcome,
    }
}

async fn converse(
    ctx: &TurnContext,
    utterance: &Utterance,
    mut history: Vec<ChatMessage>,
) -> Result<TurnOutcome> {
    let transcript = ctx.transcriber.transcribe(utterance).await?;
    let transcript = transcript.trim().to_owned();
    info!("transcript: {transcript:?}");
    ctx.emit(RuntimeEvent::Transcript(transcript.clone()));

    if transcript.is_empty() {
        return Ok(match &ctx.no_speech_reply {
            Some(text) => {
                ctx.emit(RuntimeEvent::AssistantReply(text.clone()));
                TurnOutcome::Reply(TurnReply {
                    speech: ctx.synthesizer.synthesize(text),
                    text: text.clone(),
                    history,
                })
            }
            None => TurnOutcome::Silent,
        });
    }

    history.push(ChatMessage::user(transcript));
    let tools: &[ToolDescriptor] = ctx
        .tools
        .as_ref()
        .map(|t| t.tools.as_slice())
        .unwrap_or_default();

    for round in 1..=ctx.max_tool_rounds.max(1) {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(ctx.system_prompt.clone()));
        messages.extend(history.iter().cloned());

        match ctx.assistant.respond(&messages, tools).await? {
            AssistantReply::Text(text) => {
                info!("assistant reply ({round} round(s)): {text:?}");
                history.push(ChatMessage::assistant(text.clone()));
                ctx.emit(RuntimeEvent::AssistantReply(text.clone()));
                return Ok(TurnOutcome::Reply(TurnReply {
                    speech: ctx.synthesizer.synthesize(&text),
                    text,
                    history,
                }));
            }
            AssistantReply::ToolCalls(calls) => {
                history.push(ChatMessage::assistant_tool_calls(calls.clone()));
                for call in calls {
                    let output = ctx.execute(&call).await;
                    history.push(ChatMessage::tool_result(call.id, output));
                }
            }
        }
    }

    Err(HarkError::Assistant(format!(
        "no reply after {} tool round(s)",
        ctx.max_tool_rounds.max(1)
    )))
}

impl TurnContext {
    /// Run one tool call; failures become an `Error: ...` result for the assistant.
    async fn execute(&self, call: &ToolCall) -> String {
        let Some(connected) = &self.tools else {
            warn!("assistant called {} but no tool server is connected", call.name);
            return format!("Error: tool {} is unavailable", call.name);
        };

        let arguments = match connected.tools.iter().find(|t| t.name == call.name) {
            Some(tool) => normalize_arguments(tool, call.arguments.clone()),
            None => call.arguments.clone(),
        };
        self.emit(RuntimeEvent::ToolCall {
            name: call.name.clone(),
            arguments: arguments.to_string(),
        });

        let (success, output) = match connected.connection.call_tool(&call.name, arguments).await {
            Ok(output) => (true, output),
            Err(e) => {
                warn!("tool {} failed: {e}", call.name);
                (false, format!("Error: {e}"))
            }
        };
        self.emit(RuntimeEvent::ToolResult {
            name: call.name.clone(),
            success,
            output: output.clone(),
        });
        output
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}
