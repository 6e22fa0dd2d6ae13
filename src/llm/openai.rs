//! OpenAI-compatible chat completions client

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatMessage, ChatModel, ChatReply, ToolCall, ToolDefinition, parse_arguments};
use crate::{Error, Result};

/// Chat client for `/chat/completions` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    tool_choice: &'static str,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OpenAiChatClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434/v1`)
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice: if tools.is_empty() { "none" } else { "auto" },
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("completion API error {status}: {body}")));
        }

        let body: CompletionResponse = response.json().await?;
        reply_from_response(body)
    }
}

fn reply_from_response(body: CompletionResponse) -> Result<ChatReply> {
    let message = body
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| Error::Llm("completion returned no choices".to_string()))?;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            arguments: parse_arguments(&call.function.arguments),
            name: call.function.name,
        })
        .collect();

    Ok(ChatReply {
        content: message.content.filter(|c| !c.trim().is_empty()),
        tool_calls,
    })
}
