mod anthropic;
pub use anthropic::*;

mod error;
pub use error::*;

mod models;
pub use models::*;

use async_trait::async_trait;

/// Messages-API language model: one request in, one block-structured
/// response out. The executor only talks to this trait so tests can script
/// conversations without a network.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse, LlmError>;
}
