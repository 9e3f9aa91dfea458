//! Deadline-bounded polling over an agent command's status column.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schemas::CommandStatus;
use crate::storage::{Storage, StorageError};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls never outlive the agent-loop budget regardless of what the caller
/// asks for.
pub const MAX_POLL_TIMEOUT_MS: u64 = 24_000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PollOutcome {
    pub status: PollStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Poll a command row until it reaches one of the three terminal states or
/// the (clamped) timeout expires.
pub async fn poll_until_terminal(
    storage: &dyn Storage,
    command_id: Uuid,
    timeout_ms: u64,
) -> Result<PollOutcome, StorageError> {
    let timeout_ms = timeout_ms.min(MAX_POLL_TIMEOUT_MS);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

    loop {
        let command = storage
            .get_agent_command(command_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("agent_command {command_id}")))?;

        match command.status {
            CommandStatus::Completed => {
                return Ok(PollOutcome {
                    status: PollStatus::Completed,
                    output: command.metadata.get("result").cloned(),
                    error: None,
                });
            }
            CommandStatus::Cancelled => {
                return Ok(PollOutcome {
                    status: PollStatus::Cancelled,
                    output: None,
                    error: Some("Command was cancelled".to_string()),
                });
            }
            CommandStatus::Failed => {
                let error = command
                    .metadata
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Command failed")
                    .to_string();
                return Ok(PollOutcome {
                    status: PollStatus::Failed,
                    output: None,
                    error: Some(error),
                });
            }
            CommandStatus::Pending | CommandStatus::Processing => {}
        }

        if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
            return Ok(PollOutcome {
                status: PollStatus::Timeout,
                output: None,
                error: None,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
