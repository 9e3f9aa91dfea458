use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Write rejected, {0} is in a terminal state")]
    TerminalState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}
