//! Conversational assistant boundary.
//!
//! The contract is text plus context in, text or tool calls out.
//! [`OpenAiAssistant`] speaks the OpenAI chat completions API with the
//! connected tool server's tools advertised as functions.

use crate::config::ProviderConfig;
use crate::error::{HarkError, Result};
use crate::stt::endpoint;
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A structured tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Call id, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments object.
    pub arguments: Value,
}

/// One conversation entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on assistant messages that requested tools.
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool result messages.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that asked for `calls`.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, "")
        }
    }

    /// Result of the call with `id`.
    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn to_openai(&self) -> Value {
        let mut msg = json!({"role": self.role.as_str(), "content": self.content});
        if !self.tool_calls.is_empty() {
            msg["tool_calls"] = self
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    })
                })
                .collect();
        }
        if let Some(id) = &self.tool_call_id {
            msg["tool_call_id"] = json!(id);
        }
        msg
    }
}

/// What the assistant answered.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    /// Final text to speak.
    Text(String),
    /// Tools to run before answering.
    ToolCalls(Vec<ToolCall>),
}

/// Text or tool calls out for text plus context in.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Answer the conversation in `messages`, optionally using `tools`.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Assistant`] when the collaborator fails.
    async fn respond(&self, messages: &[ChatMessage], tools: &[ToolDescriptor])
    -> Result<AssistantReply>;
}

/// Chat completions client.
pub struct OpenAiAssistant {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiAssistant {
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
        let url = endpoint(&config.api_url, "chat/completions");
        info!("assistant configured: {url} model={}", config.chat_model);
        Self {
            client: reqwest::Client::new(),
            url,
            api_key: api_key.into(),
            model: config.chat_model.clone(),
        }
    }
}

#[async_trait]
impl Assistant for OpenAiAssistant {
    async fn respond(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<AssistantReply> {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(ChatMessage::to_openai).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = tools.iter().map(function_spec).collect();
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HarkError::Assistant(format!("API error {status}: {text}")));
        }

        let value: Value = response.json().await?;
        parse_reply(&value)
    }
}

fn function_spec(tool: &ToolDescriptor) -> Value {
    let parameters = if tool.input_schema.is_null() {
        json!({"type": "object", "properties": {}})
    } else {
        tool.input_schema.clone()
    };
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters,
        },
    })
}

/// Interpret a chat completions response body.
///
/// # Errors
///
/// Returns [`HarkError::Assistant`] when there is no choice to read.
pub fn parse_reply(body: &Value) -> Result<AssistantReply> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| HarkError::Assistant("response has no choices".into()))?;

    let calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();
    if !calls.is_empty() {
        debug!("assistant requested {} tool call(s)", calls.len());
        return Ok(AssistantReply::ToolCalls(calls));
    }

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_owned();
    Ok(AssistantReply::Text(text))
}

fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?.to_owned();
    // Arguments arrive as a JSON-encoded string; keep it raw if it is not JSON.
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(other) => other.clone(),
        None => json!({}),
    };
    Some(ToolCall {
        id: call
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(&name)
            .to_owned(),
        name,
        arguments,
    })
}

/// Drop the oldest messages until at most `max` remain.
///
/// Never leaves a tool result at the front without the call that produced it.
pub fn trim_history(history: &mut Vec<ChatMessage>, max: usize) {
    let mut excess = history.len().saturating_sub(max);
    while excess < history.len() && history[excess].role == Role::Tool {
        excess += 1;
    }
    history.drain(..excess);
}
