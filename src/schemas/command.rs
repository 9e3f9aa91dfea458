use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of an [`AgentCommand`]. The three right-hand states are
/// terminal and absorbing: storage rejects any transition out of them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Cancelled
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Processing => "processing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A natural-language instruction addressed to an agent, persisted so that
/// workflow steps can poll it to completion.
///
/// `metadata.result` carries the final response on success and
/// `metadata.error` the failure message.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentCommand {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub command_text: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub metadata: Value,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentCommand {
    pub fn new(agent_id: Uuid, command_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            command_text: command_text.into(),
            status: CommandStatus::Pending,
            metadata: Value::Null,
            received_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only artifact of one finished conversation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentResponse {
    pub id: Uuid,
    #[serde(default)]
    pub command_id: Option<Uuid>,
    pub agent_id: Uuid,
    pub session_id: String,
    pub content: String,
    pub response_type: String,
    pub is_streaming: bool,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
