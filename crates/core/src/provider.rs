//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to a chat-completions model
//! and get a response back, either as a complete message or as a stream of
//! partial messages ([`MessageDelta`]) that the caller merges itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{Message, Role};

/// A chat-completions request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// System message followed by the sanitized history
    pub messages: Vec<Message>,

    /// Available tools; `None` when the agent has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Only set when `tools` is present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated assistant message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One streamed fragment of an in-progress assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Set by the orchestrator on assistant-role fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

impl MessageDelta {
    /// A content-only fragment.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    /// Re-express a complete message as a single fragment.
    pub fn from_message(message: &Message) -> Self {
        let tool_calls = message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index: index as u32,
                    id: Some(call.id.clone()),
                    kind: Some(call.kind.clone()),
                    function: Some(FunctionDelta {
                        name: Some(call.function.name.clone()),
                        arguments: Some(call.function.arguments.clone()),
                    }),
                })
                .collect()
        });

        Self {
            role: Some(message.role),
            content: message.content.clone(),
            sender: None,
            tool_calls,
            function_call: message.function_call.clone(),
            refusal: message.refusal.clone(),
        }
    }
}

/// A tool call fragment. Arrives incrementally across fragments and is
/// addressed by `index` within one assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Receiving end of a streamed completion.
pub type DeltaReceiver = mpsc::Receiver<std::result::Result<MessageDelta, ProviderError>>;

/// The core Provider trait.
///
/// The orchestrator calls `complete()` or `stream()` without knowing which
/// backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Send a request and get a stream of message fragments.
    ///
    /// Default implementation calls `complete()` and re-emits the message as
    /// a single fragment.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<DeltaReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(MessageDelta::from_message(&response.message))).await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                message: Message::assistant("done")
                    .with_tool_calls(vec![ToolCall::new("call_1", "lookup", "{}")]),
                usage: None,
                model: "fixed-model".into(),
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("hi")],
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            stream: true,
        }
    }

    #[test]
    fn request_omits_absent_tool_fields() {
        let json = serde_json::to_value(request()).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert!(json.get("parallel_tool_calls").is_none());
        assert_eq!(json["stream"], true);
    }

    #[tokio::test]
    async fn default_stream_replays_complete_as_one_fragment() {
        let mut rx = FixedProvider.stream(request()).await.unwrap();
        let delta = rx.recv().await.unwrap().unwrap();
        assert_eq!(delta.role, Some(Role::Assistant));
        assert_eq!(delta.content.as_deref(), Some("done"));
        let calls = delta.tool_calls.unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn parse_openai_tool_call_fragment() {
        let raw = r#"{"tool_calls":[{"index":1,"id":"call_b","type":"function","function":{"name":"calc","arguments":""}}]}"#;
        let delta: MessageDelta = serde_json::from_str(raw).unwrap();
        let call = &delta.tool_calls.unwrap()[0];
        assert_eq!(call.index, 1);
        assert_eq!(call.kind.as_deref(), Some("function"));
        assert_eq!(call.function.as_ref().unwrap().name.as_deref(), Some("calc"));
    }
}
