use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::command::{poll_until_terminal, PollStatus};
use crate::executor::AgentExecutor;
use crate::orchestrator::{OrchestrateParams, Orchestrator};
use crate::schemas::{
    AgentCommand, AgentCommandConfig, ConditionConfig, IntegrationActionConfig, OnFailure,
    OrchestratorStepConfig, RequestContext, RunStatus, StepResult, StepStatus, StepType,
    TriggerType, WaitConfig, Workflow, WorkflowRun, WorkflowStep,
};
use crate::storage::Storage;

use super::{evaluate_condition, parse_condition, Condition, WorkflowError};

/// Wait steps never sleep longer than this regardless of their config.
pub const MAX_WAIT_MS: u64 = 25_000;

const MAX_RETRY_BACKOFF_MS: u64 = 10_000;

/// Margin carved off a step's timeout for inner polls and fan-outs, so
/// they report their own typed timeout before the step race reaps them.
const INNER_DEADLINE_MARGIN_MS: u64 = 500;

enum ParsedStep {
    AgentCommand(AgentCommandConfig),
    Wait(WaitConfig),
    Condition(ConditionConfig, Condition),
    IntegrationAction(IntegrationActionConfig),
    Orchestrator(OrchestratorStepConfig),
}

#[derive(Debug, Clone)]
pub struct RunParams {
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub trigger_data: Value,
    /// The triggering agent, if any; agent-command steps without an
    /// explicit target run against it.
    pub agent_id: Option<Uuid>,
    /// Whether the caller presented the shared scheduler secret.
    pub scheduler_authorized: bool,
}

/// Sequential step machine: per-step timeout, bounded retries with
/// exponential backoff, conditional branching, and incremental
/// persistence of `step_results` so a crash leaves an accurate prefix.
pub struct WorkflowExecutor {
    storage: Arc<dyn Storage>,
    agent_executor: Arc<AgentExecutor>,
    orchestrator: Arc<Orchestrator>,
}

impl WorkflowExecutor {
    pub fn new(
        storage: Arc<dyn Storage>,
        agent_executor: Arc<AgentExecutor>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            storage,
            agent_executor,
            orchestrator,
        }
    }

    /// Parse every step config up front; a malformed config or condition
    /// expression fails the run before anything executes.
    fn parse_steps(workflow: &Workflow) -> Result<Vec<ParsedStep>, WorkflowError> {
        workflow
            .steps
            .iter()
            .map(|step| {
                let bad_config = |e: serde_json::Error| {
                    WorkflowError::ValidationError(format!("step {}: {e}", step.id))
                };
                Ok(match step.step_type {
                    StepType::AgentCommand => ParsedStep::AgentCommand(
                        serde_json::from_value(step.config.clone()).map_err(bad_config)?,
                    ),
                    StepType::Wait => ParsedStep::Wait(
                        serde_json::from_value(step.config.clone()).map_err(bad_config)?,
                    ),
                    StepType::Condition => {
                        let config: ConditionConfig =
                            serde_json::from_value(step.config.clone()).map_err(bad_config)?;
                        let condition = parse_condition(&config.expression)?;
                        ParsedStep::Condition(config, condition)
                    }
                    StepType::IntegrationAction => ParsedStep::IntegrationAction(
                        serde_json::from_value(step.config.clone()).map_err(bad_config)?,
                    ),
                    StepType::Orchestrator => ParsedStep::Orchestrator(
                        serde_json::from_value(step.config.clone()).map_err(bad_config)?,
                    ),
                })
            })
            .collect()
    }

    pub async fn run(
        &self,
        ctx: &RequestContext,
        params: RunParams,
    ) -> Result<WorkflowRun, WorkflowError> {
        if params.trigger_type == TriggerType::Scheduled && !params.scheduler_authorized {
            return Err(WorkflowError::Unauthorized(
                "scheduled triggers require the scheduler secret".into(),
            ));
        }

        let workflow = self
            .storage
            .get_workflow(params.workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(params.workflow_id.to_string()))?;
        if !workflow.is_active {
            return Err(WorkflowError::ValidationError(format!(
                "workflow {} is not active",
                workflow.id
            )));
        }
        let parsed = Self::parse_steps(&workflow)?;

        let mut run = WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            status: RunStatus::Running,
            trigger_type: params.trigger_type,
            trigger_data: params.trigger_data.clone(),
            step_results: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.storage.insert_workflow_run(run.clone()).await?;

        let mut branch_target: Option<String> = None;
        let mut run_error: Option<String> = None;

        for (step, parsed_step) in workflow.steps.iter().zip(&parsed) {
            // A pending branch skips every step until the named one.
            if let Some(target) = &branch_target {
                if *target != step.id {
                    log::debug!("Skipping step {} (branching to {target})", step.id);
                    run.step_results.push(StepResult::skipped(&step.id));
                    self.storage.update_workflow_run(&run).await?;
                    continue;
                }
                branch_target = None;
            }

            let result = self
                .execute_with_retries(ctx, &params, run.id, step, parsed_step, &run.step_results)
                .await;

            if result.status == StepStatus::Completed {
                branch_target = result
                    .output
                    .get("next_step")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }

            let failed = result.status == StepStatus::Failed;
            let error = result.error.clone();
            run.step_results.push(result);
            self.storage.update_workflow_run(&run).await?;

            if failed {
                match step.on_failure {
                    OnFailure::Stop => {
                        run_error = error;
                        break;
                    }
                    OnFailure::Continue | OnFailure::Skip => {
                        log::warn!(
                            "Step {} failed but on_failure={:?}, continuing",
                            step.id,
                            step.on_failure
                        );
                    }
                }
            }
        }

        run.status = if run_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        run.error = run_error;
        run.completed_at = Some(Utc::now());
        self.storage.update_workflow_run(&run).await?;
        Ok(run)
    }

    async fn execute_with_retries(
        &self,
        ctx: &RequestContext,
        params: &RunParams,
        run_id: Uuid,
        step: &WorkflowStep,
        parsed: &ParsedStep,
        prior: &[StepResult],
    ) -> StepResult {
        let mut attempt: u32 = 0;
        loop {
            let started = tokio::time::Instant::now();
            let outcome = tokio::time::timeout(
                Duration::from_millis(step.timeout_ms),
                self.execute_step(ctx, params, run_id, step, parsed, prior),
            )
            .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(Ok(output)) => {
                    return StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        output,
                        error: None,
                        duration_ms,
                    }
                }
                Ok(Err(message)) => message,
                Err(_) => format!("Step timed out after {}ms", step.timeout_ms),
            };

            if attempt >= step.retries {
                return StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Failed,
                    output: Value::Null,
                    error: Some(error),
                    duration_ms,
                };
            }

            let backoff = 1000u64
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(MAX_RETRY_BACKOFF_MS);
            log::warn!(
                "Step {} attempt {} failed ({error}), retrying in {backoff}ms",
                step.id,
                attempt + 1
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            attempt += 1;
        }
    }

    async fn execute_step(
        &self,
        ctx: &RequestContext,
        params: &RunParams,
        run_id: Uuid,
        step: &WorkflowStep,
        parsed: &ParsedStep,
        prior: &[StepResult],
    ) -> Result<Value, String> {
        match parsed {
            ParsedStep::AgentCommand(config) => {
                self.run_agent_command(ctx, params, config).await
            }

            ParsedStep::Wait(config) => {
                let waited_ms = config.delay_ms.min(MAX_WAIT_MS);
                tokio::time::sleep(Duration::from_millis(waited_ms)).await;
                Ok(json!({ "waited_ms": waited_ms }))
            }

            ParsedStep::Condition(config, condition) => {
                let condition_met = evaluate_condition(condition, prior);
                let next_step = if condition_met {
                    config.then_step.clone()
                } else {
                    config.else_step.clone()
                };
                Ok(json!({ "condition_met": condition_met, "next_step": next_step }))
            }

            ParsedStep::IntegrationAction(config) => {
                self.run_integration_action(params, step, config).await
            }

            ParsedStep::Orchestrator(config) => {
                let command = match &config.payload {
                    Some(payload) => format!("{}: {payload}", config.command),
                    None => config.command.clone(),
                };
                let outcome = self
                    .orchestrator
                    .orchestrate(
                        ctx,
                        OrchestrateParams {
                            command,
                            agent_ids: config.agent_ids.clone(),
                            strategy: config.strategy,
                            timeout_ms: Some(
                                step.timeout_ms
                                    .saturating_sub(INNER_DEADLINE_MARGIN_MS)
                                    .max(1),
                            ),
                            workflow_run_id: Some(run_id),
                            step_id: Some(step.id.clone()),
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())?;

                Ok(json!({
                    "orchestration_run_id": outcome.orchestration_run_id,
                    "status": outcome.status,
                    "merged_response": outcome.merged_response,
                    "agent_results": outcome.agent_results,
                    "duration_ms": outcome.duration_ms,
                }))
            }
        }
    }

    async fn run_agent_command(
        &self,
        ctx: &RequestContext,
        params: &RunParams,
        config: &AgentCommandConfig,
    ) -> Result<Value, String> {
        let command_text = match &config.payload {
            Some(payload) => format!("{}: {payload}", config.command),
            None => config.command.clone(),
        };

        // Explicit target, else the triggering agent, else the system
        // identity with no capabilities.
        let target = config.target_agent_id.or(params.agent_id);
        let (agent_id, capabilities) = match target {
            Some(id) => {
                let agent = self
                    .storage
                    .get_agent(id)
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("unknown agent {id}"))?;
                (id, agent.capabilities)
            }
            None => (Uuid::nil(), Vec::new()),
        };

        let command = AgentCommand::new(agent_id, command_text.clone());
        let command_id = command.id;
        self.storage
            .insert_agent_command(command)
            .await
            .map_err(|e| e.to_string())?;

        let output = self
            .agent_executor
            .execute(ctx, &command_text, agent_id, &capabilities, Some(command_id))
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "command": command_text,
            "response": output.response,
            "tool_calls": output.tool_calls,
            "turns": output.turns,
        }))
    }

    async fn run_integration_action(
        &self,
        params: &RunParams,
        step: &WorkflowStep,
        config: &IntegrationActionConfig,
    ) -> Result<Value, String> {
        // The action's default config lives on the integration row; step
        // parameters are merged over it.
        let mut merged = match config.integration_id {
            Some(integration_id) => self
                .storage
                .get_integration(integration_id)
                .await
                .map_err(|e| e.to_string())?
                .and_then(|integration| integration.config.get(&config.action_name).cloned())
                .unwrap_or_else(|| json!({})),
            None => json!({}),
        };
        if let (Value::Object(base), Some(Value::Object(overrides))) =
            (&mut merged, config.parameters.as_ref())
        {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }

        let command = AgentCommand::new(
            params.agent_id.unwrap_or_else(Uuid::nil),
            format!("integration: {}", config.action_name),
        )
        .with_metadata(json!({
            "action_name": config.action_name,
            "integration_id": config.integration_id,
            "parameters": merged,
        }));
        let command_id = command.id;
        let parameters = command.metadata["parameters"].clone();
        self.storage
            .insert_agent_command(command)
            .await
            .map_err(|e| e.to_string())?;

        let poll_timeout = step
            .timeout_ms
            .saturating_sub(INNER_DEADLINE_MARGIN_MS)
            .max(1);
        let outcome = poll_until_terminal(self.storage.as_ref(), command_id, poll_timeout)
            .await
            .map_err(|e| e.to_string())?;

        match outcome.status {
            PollStatus::Completed => Ok(json!({
                "command_id": command_id,
                "action_name": config.action_name,
                "integration_id": config.integration_id,
                "status": "completed",
                "output": outcome.output,
                "parameters": parameters,
            })),
            PollStatus::Timeout => Err(format!(
                "Integration action timed out: {}",
                config.action_name
            )),
            PollStatus::Failed | PollStatus::Cancelled => Err(outcome
                .error
                .unwrap_or_else(|| format!("Integration action failed: {}", config.action_name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{
        text_response, RecordingDispatcher, ScriptedModel, UnitEmbedder,
    };
    use crate::executor::AgentExecutor;
    use crate::llm::{LanguageModel, LlmError, MessagesRequest, MessagesResponse};
    use crate::memory::MemoryService;
    use crate::orchestrator::AgentRunner;
    use crate::schemas::{Agent, AgentStatus, AgentType, MergeStrategy};
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded_agent(storage: &InMemoryStorage, name: &str, capabilities: Vec<String>) -> Uuid {
        let agent = Agent {
            id: Uuid::new_v4(),
            name: name.into(),
            agent_type: AgentType::Autonomous,
            status: AgentStatus::Active,
            capabilities,
            rate_limit_per_minute: 60,
            allow_destructive: false,
            signing_secret_ciphertext: None,
            last_seen_at: None,
            metadata: Value::Null,
        };
        let id = agent.id;
        storage.add_agent(agent);
        id
    }

    fn step(id: &str, step_type: StepType, config: Value) -> WorkflowStep {
        serde_json::from_value(json!({
            "id": id,
            "type": serde_json::to_value(step_type).unwrap(),
            "config": config,
        }))
        .unwrap()
    }

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            name: "test workflow".into(),
            steps,
            trigger_type: TriggerType::Manual,
            trigger_config: Value::Null,
            is_active: true,
        }
    }

    struct Harness {
        storage: Arc<InMemoryStorage>,
        executor: WorkflowExecutor,
    }

    /// Per-agent scripted runner used for orchestrator steps.
    struct ScriptedRunner {
        script: HashMap<Uuid, (u64, String)>,
    }

    #[async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn run(
            &self,
            _ctx: &RequestContext,
            agent_id: Uuid,
            _command: &str,
        ) -> Result<crate::executor::ExecutionOutput, crate::executor::AgentError> {
            match self.script.get(&agent_id) {
                Some((delay_ms, response)) => {
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    Ok(crate::executor::ExecutionOutput {
                        response: response.clone(),
                        tool_calls: 0,
                        turns: 1,
                        tool_names: vec![],
                    })
                }
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn harness_with(
        storage: Arc<InMemoryStorage>,
        model: Arc<dyn LanguageModel>,
        runner: Arc<dyn AgentRunner>,
    ) -> Harness {
        let memory = Arc::new(MemoryService::new(storage.clone(), Arc::new(UnitEmbedder)));
        let agent_executor = Arc::new(AgentExecutor::new(
            storage.clone(),
            model,
            memory,
            Arc::new(RecordingDispatcher::default()),
        ));
        let orchestrator = Arc::new(Orchestrator::new(storage.clone(), runner));
        let executor = WorkflowExecutor::new(storage.clone(), agent_executor, orchestrator);
        Harness { storage, executor }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("corr-wf")
            .with_deadline(crate::schemas::Deadline::in_millis(120_000))
    }

    fn manual_params(workflow_id: Uuid, agent_id: Option<Uuid>) -> RunParams {
        RunParams {
            workflow_id,
            trigger_type: TriggerType::Manual,
            trigger_data: json!({"source": "test"}),
            agent_id,
            scheduler_authorized: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn orchestrator_then_wait() {
        let storage = Arc::new(InMemoryStorage::new());
        let x = seeded_agent(&storage, "x", vec![]);
        let y = seeded_agent(&storage, "y", vec![]);
        let z = seeded_agent(&storage, "z", vec![]);

        let runner = ScriptedRunner {
            script: HashMap::from([(x, (100, "A.".to_string())), (y, (200, "B.".to_string()))]),
        };
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(runner),
        );

        let wf = workflow(vec![
            serde_json::from_value(json!({
                "id": "a",
                "type": "orchestrator",
                "config": {"agent_ids": [x, y, z], "command": "summarize", "strategy": "merge_all"},
                "timeout_ms": 5000,
            }))
            .unwrap(),
            step("b", StepType::Wait, json!({"delay_ms": 1000})),
        ]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let run = h
            .executor
            .run(&ctx(), manual_params(workflow_id, None))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results.len(), 2);

        let a = &run.step_results[0];
        assert_eq!(a.status, StepStatus::Completed);
        assert_eq!(
            a.output["merged_response"],
            json!("[Agent x]: A.\n\n[Agent y]: B.")
        );

        let b = &run.step_results[1];
        assert_eq!(b.status, StepStatus::Completed);
        assert_eq!(b.output, json!({"waited_ms": 1000}));

        // The run row reflects the final state.
        let persisted = storage.workflow_run(run.id).unwrap();
        assert_eq!(persisted.status, RunStatus::Completed);
        assert_eq!(persisted.step_results.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn integration_action_poll_timeout_stops_the_run() {
        let storage = Arc::new(InMemoryStorage::new());
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );

        let wf = workflow(vec![
            serde_json::from_value(json!({
                "id": "sync",
                "type": "integration_action",
                "config": {"action_name": "crm_sync"},
                "timeout_ms": 2000,
            }))
            .unwrap(),
            step("after", StepType::Wait, json!({"delay_ms": 10})),
        ]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let run = h
            .executor
            .run(&ctx(), manual_params(workflow_id, None))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.error.as_deref(),
            Some("Integration action timed out: crm_sync")
        );
        // on_failure=stop: the second step was never attempted.
        assert_eq!(run.step_results.len(), 1);
        assert_eq!(run.step_results[0].status, StepStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn condition_branch_skips_to_named_step() {
        let storage = Arc::new(InMemoryStorage::new());
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );

        let wf = workflow(vec![
            step("w1", StepType::Wait, json!({"delay_ms": 10})),
            step(
                "check",
                StepType::Condition,
                json!({"expression": "w1.status == completed", "then_step": "w3", "else_step": "w2"}),
            ),
            step("w2", StepType::Wait, json!({"delay_ms": 10})),
            step("w3", StepType::Wait, json!({"delay_ms": 10})),
        ]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let run = h
            .executor
            .run(&ctx(), manual_params(workflow_id, None))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results.len(), 4);
        assert_eq!(run.step_results[1].output["condition_met"], json!(true));
        assert_eq!(run.step_results[2].status, StepStatus::Skipped);
        assert_eq!(run.step_results[2].duration_ms, 0);
        assert_eq!(run.step_results[3].status, StepStatus::Completed);
    }

    /// First call fails, second succeeds; used to observe the retry path.
    struct FlakyModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for FlakyModel {
        async fn messages(&self, _request: MessagesRequest) -> Result<MessagesResponse, LlmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LlmError::OtherError("transient".into()))
            } else {
                Ok(text_response("recovered"))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_until_success() {
        let storage = Arc::new(InMemoryStorage::new());
        let agent_id = seeded_agent(&storage, "worker", vec![]);
        let model = Arc::new(FlakyModel {
            calls: AtomicUsize::new(0),
        });
        let h = harness_with(
            storage.clone(),
            model.clone(),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );

        let wf = workflow(vec![serde_json::from_value(json!({
            "id": "task",
            "type": "agent_command",
            "config": {"command": "do the thing"},
            "retries": 1,
        }))
        .unwrap()]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let run = h
            .executor
            .run(&ctx(), manual_params(workflow_id, Some(agent_id)))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.step_results[0].output["response"], json!("recovered"));
    }

    #[tokio::test]
    async fn agent_command_appends_payload() {
        let storage = Arc::new(InMemoryStorage::new());
        let agent_id = seeded_agent(&storage, "worker", vec![]);
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![text_response("done")])),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );

        let wf = workflow(vec![step(
            "task",
            StepType::AgentCommand,
            json!({"command": "summarize", "payload": {"topic": "sales"}}),
        )]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let run = h
            .executor
            .run(&ctx(), manual_params(workflow_id, Some(agent_id)))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(
            run.step_results[0].output["command"],
            json!(r#"summarize: {"topic":"sales"}"#)
        );
    }

    #[tokio::test]
    async fn invalid_condition_fails_at_load() {
        let storage = Arc::new(InMemoryStorage::new());
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );

        let wf = workflow(vec![step(
            "bad",
            StepType::Condition,
            json!({"expression": "a.result >= 10"}),
        )]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let err = h
            .executor
            .run(&ctx(), manual_params(workflow_id, None))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));
        // Nothing ran, nothing was persisted.
        assert!(storage.workflow_run(workflow_id).is_none());
    }

    #[tokio::test]
    async fn scheduled_trigger_requires_scheduler_secret() {
        let storage = Arc::new(InMemoryStorage::new());
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );

        let wf = workflow(vec![step("w", StepType::Wait, json!({"delay_ms": 1}))]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let err = h
            .executor
            .run(
                &ctx(),
                RunParams {
                    workflow_id,
                    trigger_type: TriggerType::Scheduled,
                    trigger_data: Value::Null,
                    agent_id: None,
                    scheduler_authorized: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn on_failure_continue_proceeds() {
        let storage = Arc::new(InMemoryStorage::new());
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );

        let wf = workflow(vec![
            serde_json::from_value(json!({
                "id": "flaky",
                "type": "integration_action",
                "config": {"action_name": "always_pending"},
                "timeout_ms": 1000,
                "on_failure": "continue",
            }))
            .unwrap(),
            step("after", StepType::Wait, json!({"delay_ms": 10})),
        ]);
        let workflow_id = wf.id;
        storage.add_workflow(wf);

        let run = h
            .executor
            .run(&ctx(), manual_params(workflow_id, None))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results.len(), 2);
        assert_eq!(run.step_results[0].status, StepStatus::Failed);
        assert_eq!(run.step_results[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let storage = Arc::new(InMemoryStorage::new());
        let h = harness_with(
            storage.clone(),
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(ScriptedRunner {
                script: HashMap::new(),
            }),
        );
        let err = h
            .executor
            .run(&ctx(), manual_params(Uuid::new_v4(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }
}
