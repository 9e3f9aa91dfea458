use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Approved,
    Rejected,
}

/// Pending or resolved human sign-off for a supervised agent's action.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentConfirmation {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub action: String,
    pub status: ConfirmationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
}

/// Inter-agent message on a synthetic channel, e.g.
/// `orchestration:<run_id>` task hand-offs.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentMessage {
    pub id: Uuid,
    pub channel: String,
    #[serde(default)]
    pub from_agent_id: Option<Uuid>,
    pub to_agent_id: Uuid,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}
