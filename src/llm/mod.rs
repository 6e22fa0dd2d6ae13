//! Language-model fallback collaborator
//!
//! The resolution pipeline only needs one capability from the model: given
//! a conversation and a set of tools, either answer in text or request tool
//! calls. [`ChatModel`] captures that; [`OpenAiChatClient`] speaks the
//! OpenAI-compatible `/chat/completions` dialect served by Ollama,
//! llama.cpp and hosted providers.

mod openai;

pub use openai::OpenAiChatClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// The user's utterance
    User,
    /// A previous model answer
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Function-tool definition as offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always `"function"`
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    /// Function signature
    pub function: FunctionDefinition,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolDefinition {
    /// Tool name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Name, description and JSON-schema parameters of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Tool name
    pub name: String,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned call id
    pub id: String,
    /// Tool name
    pub name: String,
    /// Parsed arguments
    pub arguments: Map<String, Value>,
}

/// Model answer: free text, tool calls, or both
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    /// Text content, if any
    pub content: Option<String>,
    /// Requested tool calls in order
    pub tool_calls: Vec<ToolCall>,
}

/// Chat completion with tool calling
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a conversation, optionally offering tools
    ///
    /// An empty `tools` slice means the model must answer in text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatReply>;
}

/// Parse tool-call arguments leniently
///
/// Providers send either a JSON-encoded string or an inline object. Anything
/// unparseable becomes an empty argument map.
#[must_use]
pub fn parse_arguments(raw: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map.clone(),
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                tracing::warn!(arguments = %other, "tool arguments are not an object");
                Map::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, raw = %s, "failed to parse tool arguments");
                Map::new()
            }
        },
        Value::Null => Map::new(),
        other => {
            tracing::warn!(arguments = %other, "unexpected tool argument payload");
            Map::new()
        }
    }
}
