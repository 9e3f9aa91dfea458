use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::ratelimit::RateLimitDecision;
use crate::schemas::{
    Agent, AgentApiKey, AgentCommand, AgentConfirmation, AgentMemory, AgentMessage,
    AgentResponse, AuditEvent, CommandStatus, Integration, IntegrationCredential, MemoryMatch,
    MessageStatus, OAuthState, OrchestrationResponse, OrchestrationRun, TenantPlan,
    ToolDefinition, Workflow, WorkflowRun,
};

use super::{project_columns, Storage, StorageError};

/// Hex SHA-256 of a raw API key; the only form keys are stored in.
pub fn hash_api_key(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Default)]
struct RateBucket {
    window_start: DateTime<Utc>,
    count: u32,
}

#[derive(Default)]
struct Inner {
    agents: HashMap<Uuid, Agent>,
    api_keys: Vec<AgentApiKey>,
    commands: HashMap<Uuid, AgentCommand>,
    responses: Vec<AgentResponse>,
    memories: Vec<AgentMemory>,
    workflows: HashMap<Uuid, Workflow>,
    workflow_runs: HashMap<Uuid, WorkflowRun>,
    orchestration_runs: HashMap<Uuid, OrchestrationRun>,
    orchestration_responses: Vec<OrchestrationResponse>,
    messages: Vec<AgentMessage>,
    confirmations: Vec<AgentConfirmation>,
    integrations: HashMap<Uuid, Integration>,
    credentials: HashMap<Uuid, IntegrationCredential>,
    oauth_states: HashMap<String, OAuthState>,
    tools: Vec<ToolDefinition>,
    audit_events: Vec<AuditEvent>,
    events: Vec<Value>,
    tenants: HashMap<String, (Uuid, DateTime<Utc>)>,
    rate_buckets: HashMap<String, RateBucket>,
}

/// Reference [`Storage`] implementation over plain maps.
///
/// Backs the test suite and embedded single-process deployments. Seeding
/// methods (`add_agent`, `issue_api_key`, …) and snapshot accessors exist
/// outside the trait so tests can arrange and assert directly.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("storage mutex poisoned")
    }

    // -- seeding --

    pub fn add_agent(&self, agent: Agent) {
        self.lock().agents.insert(agent.id, agent);
    }

    pub fn issue_api_key(&self, agent_id: Uuid, raw_key: &str) {
        let prefix: String = raw_key.chars().take(8).collect();
        self.lock().api_keys.push(AgentApiKey {
            id: Uuid::new_v4(),
            agent_id,
            hashed_key: hash_api_key(raw_key),
            prefix,
            revoked_at: None,
        });
    }

    pub fn revoke_api_keys(&self, agent_id: Uuid) {
        let now = Utc::now();
        for key in self
            .lock()
            .api_keys
            .iter_mut()
            .filter(|k| k.agent_id == agent_id)
        {
            key.revoked_at = Some(now);
        }
    }

    pub fn add_workflow(&self, workflow: Workflow) {
        self.lock().workflows.insert(workflow.id, workflow);
    }

    pub fn add_tool_definition(&self, tool: ToolDefinition) {
        self.lock().tools.push(tool);
    }

    pub fn add_integration(&self, integration: Integration) {
        self.lock().integrations.insert(integration.id, integration);
    }

    // -- snapshots for assertions --

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.lock().audit_events.clone()
    }

    pub fn agent_responses(&self) -> Vec<AgentResponse> {
        self.lock().responses.clone()
    }

    pub fn agent_memories(&self) -> Vec<AgentMemory> {
        self.lock().memories.clone()
    }

    pub fn confirmations(&self) -> Vec<AgentConfirmation> {
        self.lock().confirmations.clone()
    }

    pub fn agent_messages(&self) -> Vec<AgentMessage> {
        self.lock().messages.clone()
    }

    pub fn workflow_run(&self, id: Uuid) -> Option<WorkflowRun> {
        self.lock().workflow_runs.get(&id).cloned()
    }

    pub fn orchestration_run(&self, id: Uuid) -> Option<OrchestrationRun> {
        self.lock().orchestration_runs.get(&id).cloned()
    }

    pub fn orchestration_responses(&self) -> Vec<OrchestrationResponse> {
        self.lock().orchestration_responses.clone()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn merge_metadata(existing: &mut Value, patch: Value) {
    match (existing, patch) {
        (Value::Object(base), Value::Object(incoming)) => {
            for (k, v) in incoming {
                base.insert(k, v);
            }
        }
        (slot, patch) => *slot = patch,
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn verify_agent_api_key(&self, raw_key: &str) -> Result<Option<Agent>, StorageError> {
        let hashed = hash_api_key(raw_key);
        let inner = self.lock();
        let matched = inner.api_keys.iter().find(|key| {
            key.revoked_at.is_none()
                && key
                    .hashed_key
                    .as_bytes()
                    .ct_eq(hashed.as_bytes())
                    .unwrap_u8()
                    == 1
        });
        Ok(matched.and_then(|key| inner.agents.get(&key.agent_id).cloned()))
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StorageError> {
        Ok(self.lock().agents.get(&id).cloned())
    }

    async fn touch_agent_last_seen(&self, id: Uuid) -> Result<(), StorageError> {
        if let Some(agent) = self.lock().agents.get_mut(&id) {
            agent.last_seen_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn check_rate_limit(
        &self,
        key: &str,
        window_ms: u64,
        max: u32,
    ) -> Result<RateLimitDecision, StorageError> {
        let now = Utc::now();
        let window = Duration::milliseconds(window_ms as i64);
        let mut inner = self.lock();
        let bucket = inner
            .rate_buckets
            .entry(key.to_string())
            .or_insert(RateBucket {
                window_start: now,
                count: 0,
            });

        if now - bucket.window_start >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        let reset_at = bucket.window_start + window;
        if bucket.count >= max {
            let retry_after = (reset_at - now).num_seconds().max(1) as u64;
            return Ok(RateLimitDecision::blocked(max, reset_at, retry_after));
        }

        bucket.count += 1;
        Ok(RateLimitDecision::allowed(max, max - bucket.count, reset_at))
    }

    async fn match_agent_memories(
        &self,
        agent_id: Uuid,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<MemoryMatch>, StorageError> {
        let inner = self.lock();
        let mut matches: Vec<MemoryMatch> = inner
            .memories
            .iter()
            .filter(|m| m.agent_id == agent_id)
            .map(|m| MemoryMatch {
                memory: m.clone(),
                similarity: cosine_similarity(&m.embedding, embedding),
            })
            .filter(|m| m.similarity >= threshold)
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(k);
        Ok(matches)
    }

    async fn touch_agent_memories(&self, ids: &[Uuid]) -> Result<(), StorageError> {
        let now = Utc::now();
        for memory in self
            .lock()
            .memories
            .iter_mut()
            .filter(|m| ids.contains(&m.id))
        {
            memory.last_accessed_at = Some(now);
        }
        Ok(())
    }

    async fn insert_agent_memory(&self, memory: AgentMemory) -> Result<(), StorageError> {
        self.lock().memories.push(memory);
        Ok(())
    }

    async fn insert_agent_command(&self, command: AgentCommand) -> Result<(), StorageError> {
        self.lock().commands.insert(command.id, command);
        Ok(())
    }

    async fn get_agent_command(&self, id: Uuid) -> Result<Option<AgentCommand>, StorageError> {
        Ok(self.lock().commands.get(&id).cloned())
    }

    async fn update_command_status(
        &self,
        id: Uuid,
        status: CommandStatus,
        metadata: Option<Value>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let command = inner
            .commands
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("agent_command {id}")))?;

        if command.status.is_terminal() {
            return Err(StorageError::TerminalState(format!("agent_command {id}")));
        }

        command.status = status;
        if let Some(patch) = metadata {
            if command.metadata.is_null() {
                command.metadata = Value::Object(Default::default());
            }
            merge_metadata(&mut command.metadata, patch);
        }
        if status.is_terminal() {
            command.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_agent_response(&self, response: AgentResponse) -> Result<(), StorageError> {
        self.lock().responses.push(response);
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StorageError> {
        Ok(self.lock().workflows.get(&id).cloned())
    }

    async fn insert_workflow_run(&self, run: WorkflowRun) -> Result<(), StorageError> {
        self.lock().workflow_runs.insert(run.id, run);
        Ok(())
    }

    async fn update_workflow_run(&self, run: &WorkflowRun) -> Result<(), StorageError> {
        self.lock().workflow_runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StorageError> {
        Ok(self.lock().workflow_runs.get(&id).cloned())
    }

    async fn insert_orchestration_run(&self, run: OrchestrationRun) -> Result<(), StorageError> {
        self.lock().orchestration_runs.insert(run.id, run);
        Ok(())
    }

    async fn update_orchestration_run(&self, run: &OrchestrationRun) -> Result<(), StorageError> {
        self.lock().orchestration_runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn insert_orchestration_response(
        &self,
        response: OrchestrationResponse,
    ) -> Result<(), StorageError> {
        self.lock().orchestration_responses.push(response);
        Ok(())
    }

    async fn update_orchestration_response(
        &self,
        response: &OrchestrationResponse,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        match inner.orchestration_responses.iter_mut().find(|r| {
            r.orchestration_run_id == response.orchestration_run_id
                && r.agent_id == response.agent_id
        }) {
            Some(row) => {
                *row = response.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "orchestration_response {}/{}",
                response.orchestration_run_id, response.agent_id
            ))),
        }
    }

    async fn insert_agent_message(&self, message: AgentMessage) -> Result<(), StorageError> {
        self.lock().messages.push(message);
        Ok(())
    }

    async fn mark_channel_delivered(&self, channel: &str) -> Result<(), StorageError> {
        for message in self
            .lock()
            .messages
            .iter_mut()
            .filter(|m| m.channel == channel)
        {
            message.status = MessageStatus::Delivered;
        }
        Ok(())
    }

    async fn find_confirmation(
        &self,
        agent_id: Uuid,
        action: &str,
    ) -> Result<Option<AgentConfirmation>, StorageError> {
        Ok(self
            .lock()
            .confirmations
            .iter()
            .find(|c| c.agent_id == agent_id && c.action == action)
            .cloned())
    }

    async fn insert_confirmation(
        &self,
        confirmation: AgentConfirmation,
    ) -> Result<(), StorageError> {
        self.lock().confirmations.push(confirmation);
        Ok(())
    }

    async fn get_integration(&self, id: Uuid) -> Result<Option<Integration>, StorageError> {
        Ok(self.lock().integrations.get(&id).cloned())
    }

    async fn get_integration_credential(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<IntegrationCredential>, StorageError> {
        Ok(self.lock().credentials.get(&integration_id).cloned())
    }

    async fn upsert_integration_credential(
        &self,
        credential: IntegrationCredential,
    ) -> Result<(), StorageError> {
        self.lock()
            .credentials
            .insert(credential.integration_id, credential);
        Ok(())
    }

    async fn insert_oauth_state(&self, state: OAuthState) -> Result<(), StorageError> {
        self.lock()
            .oauth_states
            .insert(state.state.clone(), state);
        Ok(())
    }

    async fn consume_oauth_state(&self, state: &str) -> Result<OAuthState, StorageError> {
        let mut inner = self.lock();
        let row = inner
            .oauth_states
            .get_mut(state)
            .ok_or_else(|| StorageError::NotFound("oauth_state".into()))?;
        if row.used_at.is_some() {
            return Err(StorageError::Conflict("OAuth state already used".into()));
        }
        row.used_at = Some(Utc::now());
        Ok(row.clone())
    }

    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, StorageError> {
        Ok(self.lock().tools.clone())
    }

    async fn log_audit_event(&self, event: AuditEvent) -> Result<(), StorageError> {
        self.lock().audit_events.push(event);
        Ok(())
    }

    async fn emit_event(
        &self,
        event_type: &str,
        payload: Value,
        source_type: &str,
        source_id: Option<&str>,
    ) -> Result<(), StorageError> {
        self.lock().events.push(serde_json::json!({
            "event_type": event_type,
            "payload": payload,
            "source_type": source_type,
            "source_id": source_id,
        }));
        Ok(())
    }

    async fn provision_tenant(
        &self,
        _name: &str,
        slug: &str,
        _tenant_type: &str,
        _admin_email: &str,
        _plan: TenantPlan,
        _branding: Value,
    ) -> Result<(Uuid, DateTime<Utc>), StorageError> {
        let mut inner = self.lock();
        if inner.tenants.contains_key(slug) {
            return Err(StorageError::Conflict(format!("slug taken: {slug}")));
        }
        let created = (Uuid::new_v4(), Utc::now());
        inner.tenants.insert(slug.to_string(), created);
        Ok(created)
    }

    async fn fetch_rows(
        &self,
        table: &str,
        select: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        let inner = self.lock();
        let rows: Vec<Value> = match table {
            "agents" => inner
                .agents
                .values()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "agent_commands" => inner
                .commands
                .values()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "agent_responses" => inner
                .responses
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "workflows" => inner
                .workflows
                .values()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "workflow_runs" => inner
                .workflow_runs
                .values()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "orchestration_runs" => inner
                .orchestration_runs
                .values()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "orchestration_responses" => inner
                .orchestration_responses
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "integrations" => inner
                .integrations
                .values()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            "tool_definitions" => inner
                .tools
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            other => return Err(StorageError::QueryFailed(format!("unknown table: {other}"))),
        };
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| project_columns(row, select))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{AgentStatus, AgentType};

    fn test_agent() -> Agent {
        Agent {
            id: Uuid::new_v4(),
            name: "test".into(),
            agent_type: AgentType::Autonomous,
            status: AgentStatus::Active,
            capabilities: vec!["crm".into()],
            rate_limit_per_minute: 10,
            allow_destructive: false,
            signing_secret_ciphertext: None,
            last_seen_at: None,
            metadata: Value::Null,
        }
    }

    #[tokio::test]
    async fn api_key_verification() {
        let storage = InMemoryStorage::new();
        let agent = test_agent();
        let agent_id = agent.id;
        storage.add_agent(agent);
        storage.issue_api_key(agent_id, "agf_test_key_123");

        let found = storage
            .verify_agent_api_key("agf_test_key_123")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, agent_id);

        assert!(storage
            .verify_agent_api_key("agf_wrong_key")
            .await
            .unwrap()
            .is_none());

        storage.revoke_api_keys(agent_id);
        assert!(storage
            .verify_agent_api_key("agf_test_key_123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn terminal_commands_absorb_writes() {
        let storage = InMemoryStorage::new();
        let command = AgentCommand::new(Uuid::new_v4(), "do a thing");
        let id = command.id;
        storage.insert_agent_command(command).await.unwrap();

        storage
            .update_command_status(id, CommandStatus::Completed, None)
            .await
            .unwrap();

        let err = storage
            .update_command_status(id, CommandStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TerminalState(_)));

        let row = storage.get_agent_command(id).await.unwrap().unwrap();
        assert_eq!(row.status, CommandStatus::Completed);
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn memory_matching_sorts_and_thresholds() {
        let storage = InMemoryStorage::new();
        let agent_id = Uuid::new_v4();

        for (label, embedding) in [
            ("close", vec![1.0, 0.0, 0.0]),
            ("near", vec![0.9, 0.1, 0.0]),
            ("far", vec![0.0, 1.0, 0.0]),
        ] {
            storage
                .insert_agent_memory(AgentMemory {
                    id: Uuid::new_v4(),
                    agent_id,
                    session_id: label.into(),
                    command_id: None,
                    summary: label.into(),
                    embedding,
                    command_text: String::new(),
                    response_text: String::new(),
                    tool_names: vec![],
                    turn_count: 1,
                    importance: 0.5,
                    created_at: Utc::now(),
                    last_accessed_at: None,
                })
                .await
                .unwrap();
        }

        let matches = storage
            .match_agent_memories(agent_id, &[1.0, 0.0, 0.0], 5, 0.7)
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].memory.summary, "close");
        assert!(matches[0].similarity > matches[1].similarity);
    }

    #[tokio::test]
    async fn oauth_state_is_single_use() {
        let storage = InMemoryStorage::new();
        storage
            .insert_oauth_state(OAuthState {
                state: "abc123".into(),
                integration_id: Uuid::new_v4(),
                agent_id: Uuid::new_v4(),
                redirect_uri: "https://app.example.com/cb".into(),
                used_at: None,
                expires_at: Utc::now() + Duration::minutes(5),
            })
            .await
            .unwrap();

        assert!(storage.consume_oauth_state("abc123").await.is_ok());
        let err = storage.consume_oauth_state("abc123").await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn rate_limit_bucket_caps_within_window() {
        let storage = InMemoryStorage::new();
        for _ in 0..3 {
            assert!(storage
                .check_rate_limit("agent:x", 60_000, 3)
                .await
                .unwrap()
                .allowed);
        }
        let blocked = storage.check_rate_limit("agent:x", 60_000, 3).await.unwrap();
        assert!(!blocked.allowed);
        assert!(blocked.retry_after_secs.is_some());
    }

    #[tokio::test]
    async fn fetch_rows_projects_columns() {
        let storage = InMemoryStorage::new();
        storage.add_agent(test_agent());
        let rows = storage.fetch_rows("agents", "id,name", 50).await.unwrap();
        assert_eq!(rows.len(), 1);
        let obj = rows[0].as_object().unwrap();
        assert!(obj.contains_key("id") && obj.contains_key("name"));
        assert!(!obj.contains_key("capabilities"));
    }
}
