use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::MergeStrategy;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Webhook,
    Event,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::Webhook => "webhook",
            TriggerType::Event => "event",
        };
        write!(f, "{s}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    AgentCommand,
    Wait,
    Condition,
    IntegrationAction,
    Orchestrator,
}

/// What the executor does when a step has exhausted its retries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Break out of the run; the run fails with the step's error.
    #[default]
    Stop,
    /// Record the failure and move to the next declared step.
    Continue,
    /// Same as continue; kept distinct so workflow authors can mark steps
    /// that are expected to be optional.
    Skip,
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// One node of a workflow. `config` is the raw per-type payload; the
/// executor parses it into the typed structs below at load time.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub on_failure: OnFailure,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentCommandConfig {
    pub command: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub target_agent_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaitConfig {
    pub delay_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConditionConfig {
    pub expression: String,
    #[serde(default)]
    pub then_step: Option<String>,
    #[serde(default)]
    pub else_step: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IntegrationActionConfig {
    #[serde(default)]
    pub integration_id: Option<Uuid>,
    pub action_name: String,
    #[serde(default)]
    pub parameters: Option<Value>,
}

fn default_strategy() -> MergeStrategy {
    MergeStrategy::MergeAll
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrchestratorStepConfig {
    pub agent_ids: Vec<Uuid>,
    pub command: String,
    #[serde(default = "default_strategy")]
    pub strategy: MergeStrategy,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: Value,
    pub is_active: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn skipped(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: Value::Null,
            error: None,
            duration_ms: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_data: Value,
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
