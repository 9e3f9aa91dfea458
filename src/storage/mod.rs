mod error;
pub use error::*;

mod in_memory;
pub use in_memory::*;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::ratelimit::RateLimitDecision;
use crate::schemas::{
    Agent, AgentCommand, AgentConfirmation, AgentMemory, AgentMessage, AgentResponse,
    AuditEvent, CommandStatus, Integration, IntegrationCredential, MemoryMatch, OAuthState,
    OrchestrationResponse, OrchestrationRun, TenantPlan, ToolDefinition, Workflow, WorkflowRun,
};

/// Durable storage contracts the core depends on.
///
/// Schema and SQL live outside this crate; every method here corresponds
/// to either a stored procedure (`verify_agent_api_key`,
/// `check_rate_limit`, `match_agent_memories`, …) or direct table access.
/// The in-memory implementation backs tests and embedded deployments; the
/// `postgres` feature provides the sqlx/pgvector-backed one.
#[async_trait]
pub trait Storage: Send + Sync {
    // -- agents and API keys --

    /// Hash `raw_key`, look up an active (non-revoked) key row, and return
    /// the owning agent's profile.
    async fn verify_agent_api_key(&self, raw_key: &str) -> Result<Option<Agent>, StorageError>;

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StorageError>;

    /// Best-effort `last_seen_at` bump; callers never block on it.
    async fn touch_agent_last_seen(&self, id: Uuid) -> Result<(), StorageError>;

    // -- rate limiting --

    /// Atomic check-and-increment over the `(key, window)` bucket row.
    async fn check_rate_limit(
        &self,
        key: &str,
        window_ms: u64,
        max: u32,
    ) -> Result<RateLimitDecision, StorageError>;

    // -- memories --

    /// Cosine-similarity search, sorted descending, at most `k` rows at or
    /// above `threshold`.
    async fn match_agent_memories(
        &self,
        agent_id: Uuid,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<MemoryMatch>, StorageError>;

    async fn touch_agent_memories(&self, ids: &[Uuid]) -> Result<(), StorageError>;

    async fn insert_agent_memory(&self, memory: AgentMemory) -> Result<(), StorageError>;

    // -- commands and responses --

    async fn insert_agent_command(&self, command: AgentCommand) -> Result<(), StorageError>;

    async fn get_agent_command(&self, id: Uuid) -> Result<Option<AgentCommand>, StorageError>;

    /// Transition a command's status, merging `metadata` keys into the
    /// existing object. Terminal states are absorbing: the write is
    /// rejected once the row is completed, failed, or cancelled.
    async fn update_command_status(
        &self,
        id: Uuid,
        status: CommandStatus,
        metadata: Option<Value>,
    ) -> Result<(), StorageError>;

    async fn insert_agent_response(&self, response: AgentResponse) -> Result<(), StorageError>;

    // -- workflows --

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StorageError>;

    async fn insert_workflow_run(&self, run: WorkflowRun) -> Result<(), StorageError>;

    async fn update_workflow_run(&self, run: &WorkflowRun) -> Result<(), StorageError>;

    async fn get_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StorageError>;

    // -- orchestration --

    async fn insert_orchestration_run(&self, run: OrchestrationRun) -> Result<(), StorageError>;

    async fn update_orchestration_run(&self, run: &OrchestrationRun) -> Result<(), StorageError>;

    async fn insert_orchestration_response(
        &self,
        response: OrchestrationResponse,
    ) -> Result<(), StorageError>;

    async fn update_orchestration_response(
        &self,
        response: &OrchestrationResponse,
    ) -> Result<(), StorageError>;

    // -- inter-agent messages and confirmations --

    async fn insert_agent_message(&self, message: AgentMessage) -> Result<(), StorageError>;

    async fn mark_channel_delivered(&self, channel: &str) -> Result<(), StorageError>;

    async fn find_confirmation(
        &self,
        agent_id: Uuid,
        action: &str,
    ) -> Result<Option<AgentConfirmation>, StorageError>;

    async fn insert_confirmation(
        &self,
        confirmation: AgentConfirmation,
    ) -> Result<(), StorageError>;

    // -- integrations --

    async fn get_integration(&self, id: Uuid) -> Result<Option<Integration>, StorageError>;

    async fn get_integration_credential(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<IntegrationCredential>, StorageError>;

    async fn upsert_integration_credential(
        &self,
        credential: IntegrationCredential,
    ) -> Result<(), StorageError>;

    async fn insert_oauth_state(&self, state: OAuthState) -> Result<(), StorageError>;

    /// Atomically consume a single-use OAuth state: sets `used_at` and
    /// returns the row. `Conflict` when already used, `NotFound` when the
    /// state was never issued. Expiry is the caller's check.
    async fn consume_oauth_state(&self, state: &str) -> Result<OAuthState, StorageError>;

    // -- tool catalog --

    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, StorageError>;

    // -- audit and events --

    async fn log_audit_event(&self, event: AuditEvent) -> Result<(), StorageError>;

    async fn emit_event(
        &self,
        event_type: &str,
        payload: Value,
        source_type: &str,
        source_id: Option<&str>,
    ) -> Result<(), StorageError>;

    // -- tenants --

    /// `Conflict` when the slug is already taken.
    async fn provision_tenant(
        &self,
        name: &str,
        slug: &str,
        tenant_type: &str,
        admin_email: &str,
        plan: TenantPlan,
        branding: Value,
    ) -> Result<(Uuid, DateTime<Utc>), StorageError>;

    // -- generic reads for the gateway's query route --

    /// Read up to `limit` rows from a named table. `select` is `"*"` or a
    /// comma-separated column list.
    async fn fetch_rows(
        &self,
        table: &str,
        select: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError>;
}

/// Project a serialized row down to a comma-separated column list.
/// `"*"` passes the row through untouched.
pub(crate) fn project_columns(row: Value, select: &str) -> Value {
    if select.trim() == "*" {
        return row;
    }
    let Value::Object(map) = row else {
        return row;
    };
    let wanted: Vec<&str> = select.split(',').map(str::trim).collect();
    Value::Object(
        map.into_iter()
            .filter(|(k, _)| wanted.contains(&k.as_str()))
            .collect(),
    )
}
