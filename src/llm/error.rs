use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnthropicError {
    #[error("Invalid request: {0}")]
    InvalidRequestError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Permission error: {0}")]
    PermissionError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Service overloaded: {0}")]
    OverloadedError(String),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Anthropic error: {0}")]
    AnthropicError(#[from] AnthropicError),

    #[error("Network request failed: {0}")]
    RequestError(#[from] ReqwestError),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] SerdeJsonError),

    #[error("Provider returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Content not found in response: expected at {0}")]
    ContentNotFound(String),

    #[error("Missing LLM credential")]
    MissingCredential,

    #[error("Error: {0}")]
    OtherError(String),
}
