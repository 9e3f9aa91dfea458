mod merge;
pub use merge::*;

#[allow(clippy::module_inception)]
mod orchestrator;
pub use orchestrator::*;

mod runner;
pub use runner::*;

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("No agents to orchestrate")]
    NoAgents,
}
