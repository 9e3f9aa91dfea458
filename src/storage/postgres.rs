//! sqlx/pgvector implementation of [`Storage`].
//!
//! Schema and stored procedures live in the platform's migration repo;
//! this backend only speaks the contracts (`verify_agent_api_key`,
//! `check_rate_limit`, `match_agent_memories`, …) plus direct table
//! access. Rows travel as `to_jsonb`/`jsonb_populate_record` so the serde
//! types in [`crate::schemas`] stay the single source of truth for shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ratelimit::RateLimitDecision;
use crate::schemas::{
    Agent, AgentCommand, AgentConfirmation, AgentMemory, AgentMessage, AgentResponse,
    AuditEvent, CommandStatus, Integration, IntegrationCredential, MemoryMatch, OAuthState,
    OrchestrationResponse, OrchestrationRun, TenantPlan, ToolDefinition, Workflow, WorkflowRun,
};

use super::{project_columns, Storage, StorageError};

/// Tables the generic query route may read. Anything else is refused
/// before the identifier reaches SQL.
const QUERYABLE_TABLES: &[&str] = &[
    "agents",
    "agent_commands",
    "agent_responses",
    "agent_memories",
    "agent_confirmations",
    "agent_messages",
    "workflows",
    "workflow_runs",
    "orchestration_runs",
    "orchestration_responses",
    "integrations",
    "integration_credentials",
    "oauth_states",
    "rate_limit_buckets",
    "tool_definitions",
];

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    async fn fetch_one_json<T: DeserializeOwned>(
        &self,
        sql: &str,
        id: Uuid,
    ) -> Result<Option<T>, StorageError> {
        let row = sqlx::query(sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| {
            let value: Value = r.try_get("row")?;
            Ok::<T, StorageError>(serde_json::from_value(value)?)
        })
        .transpose()
    }

    async fn insert_json(&self, table: &str, row: &Value) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1::jsonb)"
        );
        sqlx::query(&sql).bind(row).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn verify_agent_api_key(&self, raw_key: &str) -> Result<Option<Agent>, StorageError> {
        let row = sqlx::query("SELECT to_jsonb(a) AS row FROM verify_agent_api_key($1) a")
            .bind(raw_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let value: Value = r.try_get("row")?;
            Ok::<Agent, StorageError>(serde_json::from_value(value)?)
        })
        .transpose()
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StorageError> {
        self.fetch_one_json("SELECT to_jsonb(a) AS row FROM agents a WHERE a.id = $1", id)
            .await
    }

    async fn touch_agent_last_seen(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE agents SET last_seen_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn check_rate_limit(
        &self,
        key: &str,
        window_ms: u64,
        max: u32,
    ) -> Result<RateLimitDecision, StorageError> {
        let row = sqlx::query(
            "SELECT allowed, remaining, reset_at, retry_after_seconds \
             FROM check_rate_limit($1, $2, $3)",
        )
        .bind(key)
        .bind(window_ms as i64)
        .bind(max as i32)
        .fetch_one(&self.pool)
        .await?;

        let allowed: bool = row.try_get("allowed")?;
        let remaining: i32 = row.try_get("remaining")?;
        let reset_at: DateTime<Utc> = row.try_get("reset_at")?;
        let retry_after: Option<i64> = row.try_get("retry_after_seconds")?;

        Ok(RateLimitDecision {
            allowed,
            limit: max,
            remaining: remaining.max(0) as u32,
            reset_at,
            retry_after_secs: retry_after.map(|s| s.max(0) as u64),
        })
    }

    async fn match_agent_memories(
        &self,
        agent_id: Uuid,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<MemoryMatch>, StorageError> {
        let rows = sqlx::query(
            "SELECT to_jsonb(m) AS row FROM match_agent_memories($1, $2, $3, $4) m",
        )
        .bind(agent_id)
        .bind(pgvector::Vector::from(embedding.to_vec()))
        .bind(k as i32)
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let value: Value = r.try_get("row")?;
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }

    async fn touch_agent_memories(&self, ids: &[Uuid]) -> Result<(), StorageError> {
        sqlx::query("SELECT touch_agent_memories($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_agent_memory(&self, memory: AgentMemory) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO agent_memories \
             (id, agent_id, session_id, command_id, summary, embedding, command_text, \
              response_text, tool_names, turn_count, importance, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(memory.id)
        .bind(memory.agent_id)
        .bind(&memory.session_id)
        .bind(memory.command_id)
        .bind(&memory.summary)
        .bind(pgvector::Vector::from(memory.embedding.clone()))
        .bind(&memory.command_text)
        .bind(&memory.response_text)
        .bind(&memory.tool_names)
        .bind(memory.turn_count as i32)
        .bind(memory.importance)
        .bind(memory.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_agent_command(&self, command: AgentCommand) -> Result<(), StorageError> {
        self.insert_json("agent_commands", &serde_json::to_value(&command)?)
            .await
    }

    async fn get_agent_command(&self, id: Uuid) -> Result<Option<AgentCommand>, StorageError> {
        self.fetch_one_json(
            "SELECT to_jsonb(c) AS row FROM agent_commands c WHERE c.id = $1",
            id,
        )
        .await
    }

    async fn update_command_status(
        &self,
        id: Uuid,
        status: CommandStatus,
        metadata: Option<Value>,
    ) -> Result<(), StorageError> {
        let terminal = status.is_terminal();
        let result = sqlx::query(
            "UPDATE agent_commands \
             SET status = $2, \
                 metadata = coalesce(metadata, '{}'::jsonb) || coalesce($3::jsonb, '{}'::jsonb), \
                 completed_at = CASE WHEN $4 THEN now() ELSE completed_at END \
             WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id)
        .bind(status.to_string())
        .bind(metadata)
        .bind(terminal)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM agent_commands WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return Err(if exists {
                StorageError::TerminalState(format!("agent_command {id}"))
            } else {
                StorageError::NotFound(format!("agent_command {id}"))
            });
        }
        Ok(())
    }

    async fn insert_agent_response(&self, response: AgentResponse) -> Result<(), StorageError> {
        self.insert_json("agent_responses", &serde_json::to_value(&response)?)
            .await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StorageError> {
        self.fetch_one_json(
            "SELECT to_jsonb(w) AS row FROM workflows w WHERE w.id = $1",
            id,
        )
        .await
    }

    async fn insert_workflow_run(&self, run: WorkflowRun) -> Result<(), StorageError> {
        self.insert_json("workflow_runs", &serde_json::to_value(&run)?)
            .await
    }

    async fn update_workflow_run(&self, run: &WorkflowRun) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE workflow_runs \
             SET status = $2, step_results = $3::jsonb, error = $4, completed_at = $5 \
             WHERE id = $1",
        )
        .bind(run.id)
        .bind(serde_json::to_value(run.status)?.as_str().unwrap_or("running").to_string())
        .bind(serde_json::to_value(&run.step_results)?)
        .bind(&run.error)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StorageError> {
        self.fetch_one_json(
            "SELECT to_jsonb(r) AS row FROM workflow_runs r WHERE r.id = $1",
            id,
        )
        .await
    }

    async fn insert_orchestration_run(&self, run: OrchestrationRun) -> Result<(), StorageError> {
        self.insert_json("orchestration_runs", &serde_json::to_value(&run)?)
            .await
    }

    async fn update_orchestration_run(&self, run: &OrchestrationRun) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE orchestration_runs \
             SET status = $2, result = $3::jsonb, completed_at = $4 \
             WHERE id = $1",
        )
        .bind(run.id)
        .bind(serde_json::to_value(run.status)?.as_str().unwrap_or("running").to_string())
        .bind(&run.result)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_orchestration_response(
        &self,
        response: OrchestrationResponse,
    ) -> Result<(), StorageError> {
        self.insert_json("orchestration_responses", &serde_json::to_value(&response)?)
            .await
    }

    async fn update_orchestration_response(
        &self,
        response: &OrchestrationResponse,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE orchestration_responses \
             SET status = $3, response = $4, tool_calls = $5, turns = $6, score = $7, \
                 duration_ms = $8, error = $9, completed_at = $10 \
             WHERE orchestration_run_id = $1 AND agent_id = $2",
        )
        .bind(response.orchestration_run_id)
        .bind(response.agent_id)
        .bind(serde_json::to_value(response.status)?.as_str().unwrap_or("pending").to_string())
        .bind(&response.response)
        .bind(response.tool_calls as i32)
        .bind(response.turns as i32)
        .bind(response.score)
        .bind(response.duration_ms as i64)
        .bind(&response.error)
        .bind(response.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_agent_message(&self, message: AgentMessage) -> Result<(), StorageError> {
        self.insert_json("agent_messages", &serde_json::to_value(&message)?)
            .await
    }

    async fn mark_channel_delivered(&self, channel: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE agent_messages SET status = 'delivered' WHERE channel = $1")
            .bind(channel)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_confirmation(
        &self,
        agent_id: Uuid,
        action: &str,
    ) -> Result<Option<AgentConfirmation>, StorageError> {
        let row = sqlx::query(
            "SELECT to_jsonb(c) AS row FROM agent_confirmations c \
             WHERE c.agent_id = $1 AND c.action = $2 \
             ORDER BY c.created_at DESC LIMIT 1",
        )
        .bind(agent_id)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            let value: Value = r.try_get("row")?;
            Ok::<AgentConfirmation, StorageError>(serde_json::from_value(value)?)
        })
        .transpose()
    }

    async fn insert_confirmation(
        &self,
        confirmation: AgentConfirmation,
    ) -> Result<(), StorageError> {
        self.insert_json("agent_confirmations", &serde_json::to_value(&confirmation)?)
            .await
    }

    async fn get_integration(&self, id: Uuid) -> Result<Option<Integration>, StorageError> {
        self.fetch_one_json(
            "SELECT to_jsonb(i) AS row FROM integrations i WHERE i.id = $1",
            id,
        )
        .await
    }

    async fn get_integration_credential(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<IntegrationCredential>, StorageError> {
        self.fetch_one_json(
            "SELECT to_jsonb(c) AS row FROM integration_credentials c \
             WHERE c.integration_id = $1",
            integration_id,
        )
        .await
    }

    async fn upsert_integration_credential(
        &self,
        credential: IntegrationCredential,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO integration_credentials \
             (id, integration_id, encrypted_payload, key_version, expires_at, last_used_at) \
             VALUES ($1, $2, $3::jsonb, $4, $5, $6) \
             ON CONFLICT (integration_id) DO UPDATE SET \
                 encrypted_payload = excluded.encrypted_payload, \
                 key_version = excluded.key_version, \
                 expires_at = excluded.expires_at, \
                 last_used_at = excluded.last_used_at",
        )
        .bind(credential.id)
        .bind(credential.integration_id)
        .bind(serde_json::to_value(&credential.encrypted_payload)?)
        .bind(&credential.key_version)
        .bind(credential.expires_at)
        .bind(credential.last_used_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_oauth_state(&self, state: OAuthState) -> Result<(), StorageError> {
        self.insert_json("oauth_states", &serde_json::to_value(&state)?)
            .await
    }

    async fn consume_oauth_state(&self, state: &str) -> Result<OAuthState, StorageError> {
        let row = sqlx::query(
            "UPDATE oauth_states SET used_at = now() \
             WHERE state = $1 AND used_at IS NULL \
             RETURNING to_jsonb(oauth_states) AS row",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let value: Value = r.try_get("row")?;
                Ok(serde_json::from_value(value)?)
            }
            None => {
                let exists = sqlx::query("SELECT 1 FROM oauth_states WHERE state = $1")
                    .bind(state)
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
                Err(if exists {
                    StorageError::Conflict("OAuth state already used".into())
                } else {
                    StorageError::NotFound("oauth_state".into())
                })
            }
        }
    }

    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, StorageError> {
        let rows = sqlx::query("SELECT to_jsonb(t) AS row FROM tool_definitions t")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| {
                let value: Value = r.try_get("row")?;
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }

    async fn log_audit_event(&self, event: AuditEvent) -> Result<(), StorageError> {
        sqlx::query("SELECT log_audit_event($1, $2, $3, $4, $5, $6)")
            .bind(&event.actor_type)
            .bind(&event.actor_id)
            .bind(&event.action)
            .bind(&event.resource_type)
            .bind(&event.resource_id)
            .bind(&event.details)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn emit_event(
        &self,
        event_type: &str,
        payload: Value,
        source_type: &str,
        source_id: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query("SELECT emit_event($1, $2, $3, $4)")
            .bind(event_type)
            .bind(payload)
            .bind(source_type)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn provision_tenant(
        &self,
        name: &str,
        slug: &str,
        tenant_type: &str,
        admin_email: &str,
        plan: TenantPlan,
        branding: Value,
    ) -> Result<(Uuid, DateTime<Utc>), StorageError> {
        let plan = serde_json::to_value(plan)?
            .as_str()
            .unwrap_or("free")
            .to_string();
        let row = sqlx::query(
            "SELECT tenant_id, created_at FROM provision_tenant($1, $2, $3, $4, $5, $6)",
        )
        .bind(name)
        .bind(slug)
        .bind(tenant_type)
        .bind(admin_email)
        .bind(plan)
        .bind(branding)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Conflict(format!("slug taken: {slug}"))
            }
            _ => StorageError::from(e),
        })?;

        Ok((row.try_get("tenant_id")?, row.try_get("created_at")?))
    }

    async fn fetch_rows(
        &self,
        table: &str,
        select: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        if !QUERYABLE_TABLES.contains(&table) {
            return Err(StorageError::QueryFailed(format!("unknown table: {table}")));
        }

        let sql = format!("SELECT to_jsonb(t) AS row FROM {table} t LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let value: Value = r.try_get("row")?;
                Ok::<Value, StorageError>(project_columns(value, select))
            })
            .collect::<Result<Vec<_>, _>>()?)
    }
}
