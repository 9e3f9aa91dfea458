use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::executor::{AgentError, AgentExecutor, ExecutionOutput};
use crate::schemas::RequestContext;
use crate::storage::Storage;

/// How the orchestrator reaches individual agents.
///
/// Production wraps the in-process [`AgentExecutor`]; tests script per-agent
/// outcomes and latencies.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        ctx: &RequestContext,
        agent_id: Uuid,
        command: &str,
    ) -> Result<ExecutionOutput, AgentError>;
}

/// Runner that resolves the agent row for its capability set, then hands
/// the command to the executor.
pub struct ExecutorRunner {
    storage: Arc<dyn Storage>,
    executor: Arc<AgentExecutor>,
}

impl ExecutorRunner {
    pub fn new(storage: Arc<dyn Storage>, executor: Arc<AgentExecutor>) -> Self {
        Self { storage, executor }
    }
}

#[async_trait]
impl AgentRunner for ExecutorRunner {
    async fn run(
        &self,
        ctx: &RequestContext,
        agent_id: Uuid,
        command: &str,
    ) -> Result<ExecutionOutput, AgentError> {
        let agent = self
            .storage
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AgentError::OtherError(format!("unknown agent {agent_id}")))?;

        self.executor
            .execute(ctx, command, agent_id, &agent.capabilities, None)
            .await
    }
}
