use thiserror::Error;

use crate::llm::LlmError;
use crate::storage::StorageError;

use super::DispatchError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Dispatch error: {0}")]
    DispatchError(#[from] DispatchError),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Error: {0}")]
    OtherError(String),
}
