use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("No embedding credential configured")]
    MissingCredential,

    #[error("Network request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Embedding provider returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Embedding request timed out")]
    Timeout,

    #[error("Provider returned no embedding")]
    EmptyResponse,
}
