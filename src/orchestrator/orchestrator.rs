use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::schemas::{
    AgentMessage, AgentRunStatus, MergeStrategy, MessageStatus, OrchestrationResponse,
    OrchestrationRun, OrchestrationStatus, RequestContext,
};
use crate::storage::Storage;

use super::{merge_results, AgentRunResult, AgentRunner, OrchestratorError};

/// Default fan-out deadline; callers may tighten it but never push past
/// the gateway's own request ceiling.
pub const DEFAULT_ORCHESTRATION_TIMEOUT_MS: u64 = 20_000;
const MAX_ORCHESTRATION_TIMEOUT_MS: u64 = 24_000;

#[derive(Debug, Clone)]
pub struct OrchestrateParams {
    pub command: String,
    pub agent_ids: Vec<Uuid>,
    pub strategy: MergeStrategy,
    pub timeout_ms: Option<u64>,
    pub workflow_run_id: Option<Uuid>,
    pub step_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub orchestration_run_id: Uuid,
    pub status: OrchestrationStatus,
    pub merged_response: String,
    pub agent_results: Vec<AgentRunResult>,
    pub duration_ms: u64,
}

/// Fans one command out to many agents, collects partial results under a
/// single deadline, and merges them.
pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    runner: Arc<dyn AgentRunner>,
}

impl Orchestrator {
    pub fn new(storage: Arc<dyn Storage>, runner: Arc<dyn AgentRunner>) -> Self {
        Self { storage, runner }
    }

    pub async fn orchestrate(
        &self,
        ctx: &RequestContext,
        params: OrchestrateParams,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        if params.agent_ids.is_empty() {
            return Err(OrchestratorError::NoAgents);
        }

        let run_id = Uuid::new_v4();
        let channel = format!("orchestration:{run_id}");
        let started = tokio::time::Instant::now();
        let started_at = Utc::now();
        let timeout_ms = params
            .timeout_ms
            .unwrap_or(DEFAULT_ORCHESTRATION_TIMEOUT_MS)
            .min(MAX_ORCHESTRATION_TIMEOUT_MS);
        let deadline = ctx.deadline.clamped(timeout_ms);

        self.storage
            .insert_orchestration_run(OrchestrationRun {
                id: run_id,
                workflow_run_id: params.workflow_run_id,
                step_id: params.step_id.clone(),
                command: params.command.clone(),
                agent_ids: params.agent_ids.clone(),
                strategy: params.strategy,
                status: OrchestrationStatus::Running,
                result: serde_json::Value::Null,
                started_at,
                completed_at: None,
            })
            .await?;

        for agent_id in &params.agent_ids {
            self.storage
                .insert_orchestration_response(OrchestrationResponse {
                    orchestration_run_id: run_id,
                    agent_id: *agent_id,
                    status: AgentRunStatus::Pending,
                    response: None,
                    tool_calls: 0,
                    turns: 0,
                    score: None,
                    duration_ms: 0,
                    error: None,
                    completed_at: None,
                })
                .await?;

            self.storage
                .insert_agent_message(AgentMessage {
                    id: Uuid::new_v4(),
                    channel: channel.clone(),
                    from_agent_id: ctx.agent_id,
                    to_agent_id: *agent_id,
                    content: params.command.clone(),
                    status: MessageStatus::Pending,
                    created_at: Utc::now(),
                })
                .await?;
        }

        // Fan out; every dispatch races the same deadline.
        let mut join_set: JoinSet<AgentRunResult> = JoinSet::new();
        for agent_id in params.agent_ids.clone() {
            let runner = Arc::clone(&self.runner);
            let command = params.command.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let agent_started = tokio::time::Instant::now();
                match runner.run(&ctx, agent_id, &command).await {
                    Ok(output) => AgentRunResult {
                        agent_id,
                        status: AgentRunStatus::Completed,
                        response: Some(output.response),
                        tool_calls: output.tool_calls,
                        turns: output.turns,
                        score: None,
                        duration_ms: agent_started.elapsed().as_millis() as u64,
                        error: None,
                    },
                    Err(e) => AgentRunResult {
                        agent_id,
                        status: AgentRunStatus::Failed,
                        response: None,
                        tool_calls: 0,
                        turns: 0,
                        score: None,
                        duration_ms: agent_started.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    },
                }
            });
        }

        let mut collected: HashMap<Uuid, AgentRunResult> = HashMap::new();
        let deadline_sleep = tokio::time::sleep_until(deadline.instant());
        tokio::pin!(deadline_sleep);

        loop {
            tokio::select! {
                _ = &mut deadline_sleep => break,
                joined = join_set.join_next() => match joined {
                    Some(Ok(result)) => {
                        collected.insert(result.agent_id, result);
                    }
                    Some(Err(e)) => log::warn!("Orchestration task join error: {e}"),
                    None => break,
                },
            }
        }
        join_set.abort_all();

        // Stable agent-id-indexed list in the declared order; anything
        // still outstanding at the deadline is recorded as timed out.
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let results: Vec<AgentRunResult> = params
            .agent_ids
            .iter()
            .map(|agent_id| {
                collected.remove(agent_id).unwrap_or(AgentRunResult {
                    agent_id: *agent_id,
                    status: AgentRunStatus::TimedOut,
                    response: None,
                    tool_calls: 0,
                    turns: 0,
                    score: None,
                    duration_ms: elapsed_ms,
                    error: Some("Timed out waiting for agent".to_string()),
                })
            })
            .collect();

        let now = Utc::now();
        for result in &results {
            self.storage
                .update_orchestration_response(&OrchestrationResponse {
                    orchestration_run_id: run_id,
                    agent_id: result.agent_id,
                    status: result.status,
                    response: result.response.clone(),
                    tool_calls: result.tool_calls,
                    turns: result.turns,
                    score: result.score,
                    duration_ms: result.duration_ms,
                    error: result.error.clone(),
                    completed_at: Some(now),
                })
                .await?;
        }

        let name_rows = futures::future::join_all(
            params.agent_ids.iter().map(|id| self.storage.get_agent(*id)),
        )
        .await;
        let agent_names: HashMap<Uuid, String> = name_rows
            .into_iter()
            .flatten()
            .flatten()
            .map(|agent| (agent.id, agent.name))
            .collect();

        let merged_response = merge_results(params.strategy, &results, &agent_names);

        let completed = results
            .iter()
            .filter(|r| r.status == AgentRunStatus::Completed)
            .count();
        let timed_out = results
            .iter()
            .filter(|r| r.status == AgentRunStatus::TimedOut)
            .count();
        let status = if completed > 0 {
            OrchestrationStatus::Completed
        } else if timed_out == results.len() {
            OrchestrationStatus::TimedOut
        } else {
            OrchestrationStatus::Failed
        };

        self.storage.mark_channel_delivered(&channel).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.storage
            .update_orchestration_run(&OrchestrationRun {
                id: run_id,
                workflow_run_id: params.workflow_run_id,
                step_id: params.step_id,
                command: params.command,
                agent_ids: params.agent_ids,
                strategy: params.strategy,
                status,
                result: json!({
                    "merged_response": merged_response,
                    "completed": completed,
                    "timed_out": timed_out,
                    "failed": results.len() - completed - timed_out,
                }),
                started_at,
                completed_at: Some(now),
            })
            .await?;

        Ok(OrchestrationOutcome {
            orchestration_run_id: run_id,
            status,
            merged_response,
            agent_results: results,
            duration_ms,
        })
    }
}
