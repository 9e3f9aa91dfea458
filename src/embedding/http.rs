use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config;

use super::{Embedder, EmbedderError};

/// Hard deadline on embedding calls; retrieval degrades gracefully rather
/// than stalling the agent loop.
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Client for an OpenAI-style `POST /v1/embeddings` endpoint with Bearer
/// auth.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: config::embedding_model(),
            api_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(config::embedding_base_url(), config::embedding_api_key())
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let api_key = self.api_key.as_ref().ok_or(EmbedderError::MissingCredential)?;

        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .timeout(EMBEDDING_TIMEOUT);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbedderError::Timeout
            } else {
                EmbedderError::RequestError(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedderError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.is_empty() {
            return Err(EmbedderError::EmptyResponse);
        }
        Ok(parsed.data.swap_remove(0).embedding)
    }
}
