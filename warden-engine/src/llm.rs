//! A JSON-in/JSON-out chat completion helper.
//!
//! The contract is an unstructured assistant message containing a fenced ```` ```json
//! ```` block; this is built on `reqwest` rather than `async-openai` because that
//! fenced-block extraction doesn't fit `async-openai`'s typed response shape.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::LlmError;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// `complete` sends `messages` to the chat completion endpoint and returns the parsed
/// JSON object extracted from the assistant's fenced block.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Value, LlmError>;
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "messages": messages });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::MalformedJson("missing choices[0].message.content".to_string()))?;

        extract_fenced_json(content)
    }
}

/// Extracts and parses the first ```` ```json ... ``` ```` fenced block in `content`,
/// tolerating leading/trailing prose around it.
pub fn extract_fenced_json(content: &str) -> Result<Value, LlmError> {
    let marker = "```json";
    let start = content.find(marker).ok_or(LlmError::MissingFence)?;
    let after_marker = &content[start + marker.len()..];
    let end = after_marker.find("```").ok_or(LlmError::MissingFence)?;
    let body = &after_marker[..end];
    serde_json::from_str(body).map_err(|e| LlmError::MalformedJson(e.to_string()))
}
