use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::config;

use super::{AnthropicError, LanguageModel, LlmError, MessagesRequest, MessagesResponse};

pub enum ClaudeModel {
    Claude3Opus,
    Claude3Sonnet,
    Claude3Haiku,
    Claude3_5Sonnet,
}

impl fmt::Display for ClaudeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaudeModel::Claude3Opus => write!(f, "claude-3-opus-20240229"),
            ClaudeModel::Claude3Sonnet => write!(f, "claude-3-sonnet-20240229"),
            ClaudeModel::Claude3Haiku => write!(f, "claude-3-haiku-20240307"),
            ClaudeModel::Claude3_5Sonnet => write!(f, "claude-3-5-sonnet-20240620"),
        }
    }
}

/// Client for the Anthropic messages API.
#[derive(Clone)]
pub struct Anthropic {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    anthropic_version: String,
}

impl Default for Anthropic {
    fn default() -> Self {
        Self::new()
    }
}

impl Anthropic {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key: config::llm_api_key().ok(),
            anthropic_version: "2023-06-01".to_string(),
        }
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_anthropic_version<S: Into<String>>(mut self, version: S) -> Self {
        self.anthropic_version = version.into();
        self
    }

    fn classify_status(status: u16, body: &str) -> LlmError {
        // The error body is `{"error": {"type": ..., "message": ...}}` when
        // the provider got far enough to produce one.
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.to_string());

        match status {
            400 => AnthropicError::InvalidRequestError(message).into(),
            401 => AnthropicError::AuthenticationError(message).into(),
            403 => AnthropicError::PermissionError(message).into(),
            404 => AnthropicError::NotFoundError(message).into(),
            429 => AnthropicError::RateLimitError(message).into(),
            503 | 529 => AnthropicError::OverloadedError(message).into(),
            _ => LlmError::UpstreamError {
                status,
                body: message,
            },
        }
    }
}

#[async_trait]
impl LanguageModel for Anthropic {
    async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse, LlmError> {
        let api_key = self.api_key.as_ref().ok_or(LlmError::MissingCredential)?;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", &self.anthropic_version)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status.as_u16(), &body));
        }

        Ok(response.json::<MessagesResponse>().await?)
    }
}
