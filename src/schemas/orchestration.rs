use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How fan-out results are folded into one response.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    FirstCompleted,
    BestScore,
    MergeAll,
    Consensus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// Terminal status of one fan-out target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Pending,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrchestrationRun {
    pub id: Uuid,
    #[serde(default)]
    pub workflow_run_id: Option<Uuid>,
    #[serde(default)]
    pub step_id: Option<String>,
    pub command: String,
    pub agent_ids: Vec<Uuid>,
    pub strategy: MergeStrategy,
    pub status: OrchestrationStatus,
    #[serde(default)]
    pub result: Value,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One row per fan-out target, created `pending` up front and finalized
/// when the target completes, fails, or hits the shared deadline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrchestrationResponse {
    pub orchestration_run_id: Uuid,
    pub agent_id: Uuid,
    pub status: AgentRunStatus,
    #[serde(default)]
    pub response: Option<String>,
    pub tool_calls: u32,
    pub turns: u32,
    #[serde(default)]
    pub score: Option<f32>,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
