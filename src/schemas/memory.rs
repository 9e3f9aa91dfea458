use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A past (command, response) summary with its embedding, retrieved by
/// cosine similarity to seed future system prompts.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentMemory {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub session_id: String,
    #[serde(default)]
    pub command_id: Option<Uuid>,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub command_text: String,
    pub response_text: String,
    pub tool_names: Vec<String>,
    pub turn_count: u32,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// One row returned by the similarity query, sorted descending by
/// `similarity`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MemoryMatch {
    #[serde(flatten)]
    pub memory: AgentMemory,
    pub similarity: f32,
}
