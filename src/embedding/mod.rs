mod error;
pub use error::*;

mod http;
pub use http::*;

use async_trait::async_trait;

/// Turns text into a fixed-dimension vector.
///
/// Memory retrieval and persistence both go through this seam so tests can
/// substitute a deterministic embedder.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;
}

impl<E> From<E> for Box<dyn Embedder>
where
    E: Embedder + 'static,
{
    fn from(embedder: E) -> Self {
        Box::new(embedder)
    }
}
