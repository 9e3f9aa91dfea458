use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config;
use crate::llm::{ChatMessage, ContentBlock, LanguageModel, MessagesRequest, ToolSchema};
use crate::memory::MemoryService;
use crate::registry::can_perform_action;
use crate::safety::{
    detect_prompt_injection, filter_response, filter_tool_output, has_blocking, wrap_tool_result,
};
use crate::schemas::{AgentResponse, AuditEvent, CommandStatus, RequestContext};
use crate::storage::Storage;
use crate::utils::normalize_tool_name;

use super::{
    build_system_prompt, AgentError, InternalDispatcher, MAX_TURNS_MESSAGE, SAFETY_REFUSAL,
    TIMEOUT_MESSAGE,
};

/// Options for the [`AgentExecutor`].
pub struct ExecutorOptions {
    /// Max LLM turns per conversation.
    pub max_turns: u32,
    /// Wall-clock budget for the whole loop.
    pub deadline_ms: u64,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_turns: 5,
            deadline_ms: 24_000,
            model: config::llm_model(),
            max_tokens: 1024,
        }
    }
}

impl ExecutorOptions {
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }
}

/// What one conversation produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub response: String,
    pub tool_calls: u32,
    pub turns: u32,
    pub tool_names: Vec<String>,
}

impl ExecutionOutput {
    fn refusal() -> Self {
        Self {
            response: SAFETY_REFUSAL.to_string(),
            tool_calls: 0,
            turns: 0,
            tool_names: Vec::new(),
        }
    }
}

struct LoadedTool {
    action_name: String,
    schema: ToolSchema,
}

/// The tool-use conversation loop.
///
/// Composes the safety filter, memory retrieval, the LLM client, and the
/// internal dispatcher: the model alternately emits text and tool-use
/// blocks, tools run through [`InternalDispatcher`], and their filtered
/// output feeds the next turn until the model stops or a bound is hit.
pub struct AgentExecutor {
    storage: Arc<dyn Storage>,
    llm: Arc<dyn LanguageModel>,
    memory: Arc<MemoryService>,
    dispatcher: Arc<dyn InternalDispatcher>,
    options: ExecutorOptions,
}

impl AgentExecutor {
    pub fn new(
        storage: Arc<dyn Storage>,
        llm: Arc<dyn LanguageModel>,
        memory: Arc<MemoryService>,
        dispatcher: Arc<dyn InternalDispatcher>,
    ) -> Self {
        Self {
            storage,
            llm,
            memory,
            dispatcher,
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one command to completion.
    ///
    /// A blocking injection violation short-circuits to the fixed refusal
    /// with nothing recorded. Any other failure transitions the command to
    /// `failed` and is re-raised to the caller.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        command: &str,
        agent_id: Uuid,
        capabilities: &[String],
        command_id: Option<Uuid>,
    ) -> Result<ExecutionOutput, AgentError> {
        let violations = detect_prompt_injection(command);
        if has_blocking(&violations) {
            log::warn!(
                "Blocking injection violation from agent {agent_id}: {:?}",
                violations.iter().map(|v| v.kind.as_str()).collect::<Vec<_>>()
            );
            return Ok(ExecutionOutput::refusal());
        }

        if let Some(id) = command_id {
            if let Err(e) = self
                .storage
                .update_command_status(id, CommandStatus::Processing, None)
                .await
            {
                log::warn!("Could not mark command {id} processing: {e}");
            }
        }

        let started = tokio::time::Instant::now();
        match self.run_loop(ctx, command, agent_id, capabilities).await {
            Ok(output) => {
                self.finish(ctx, command, agent_id, command_id, &output, started.elapsed())
                    .await;
                Ok(output)
            }
            Err(e) => {
                if let Some(id) = command_id {
                    let patch = json!({ "error": e.to_string() });
                    if let Err(update_err) = self
                        .storage
                        .update_command_status(id, CommandStatus::Failed, Some(patch))
                        .await
                    {
                        log::warn!("Could not mark command {id} failed: {update_err}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn load_tools(&self, capabilities: &[String]) -> Result<HashMap<String, LoadedTool>, AgentError> {
        let mut tools = HashMap::new();
        for definition in self.storage.get_tool_definitions().await? {
            if !definition.is_active
                || !capabilities.iter().any(|c| *c == definition.capability_name)
            {
                continue;
            }
            if let Err(reason) = definition.validate_schema() {
                log::warn!("Skipping tool with invalid schema: {reason}");
                continue;
            }
            tools.insert(
                normalize_tool_name(&definition.name),
                LoadedTool {
                    action_name: definition.action_name.clone(),
                    schema: ToolSchema {
                        name: definition.name,
                        description: definition.description,
                        input_schema: definition.input_schema,
                    },
                },
            );
        }
        Ok(tools)
    }

    async fn run_loop(
        &self,
        ctx: &RequestContext,
        command: &str,
        agent_id: Uuid,
        capabilities: &[String],
    ) -> Result<ExecutionOutput, AgentError> {
        let deadline = ctx.deadline.clamped(self.options.deadline_ms);

        let memories = self.memory.retrieve(agent_id, command).await;
        let system_prompt =
            build_system_prompt(MemoryService::format_for_prompt(&memories).as_deref());

        let tools = self.load_tools(capabilities).await?;
        let tool_schemas: Vec<ToolSchema> = tools.values().map(|t| t.schema.clone()).collect();

        let mut messages = vec![ChatMessage::user(command)];
        let mut tool_calls: u32 = 0;
        let mut turns: u32 = 0;
        let mut tool_names: Vec<String> = Vec::new();

        let exhausted = |response: &str, tool_calls: u32, turns: u32, tool_names: &[String]| {
            ExecutionOutput {
                response: response.to_string(),
                tool_calls,
                turns,
                tool_names: tool_names.to_vec(),
            }
        };

        while turns < self.options.max_turns {
            if deadline.expired() {
                return Ok(exhausted(TIMEOUT_MESSAGE, tool_calls, turns, &tool_names));
            }

            let request = MessagesRequest {
                model: self.options.model.clone(),
                max_tokens: self.options.max_tokens,
                messages: messages.clone(),
                system: Some(system_prompt.clone()),
                tools: tool_schemas.clone(),
            };

            let response =
                match tokio::time::timeout(deadline.remaining(), self.llm.messages(request)).await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        return Ok(exhausted(TIMEOUT_MESSAGE, tool_calls, turns, &tool_names))
                    }
                };
            turns += 1;

            if !response.wants_tool_use() {
                let text = response.extract_text();
                let filtered = filter_response(&text);
                for violation in &filtered.violations {
                    log::warn!("Response filter violation for agent {agent_id}: {}", violation.kind);
                }
                return Ok(ExecutionOutput {
                    response: filtered.content,
                    tool_calls,
                    turns,
                    tool_names,
                });
            }

            // Tool turn: run every tool_use block in order of appearance,
            // then hand all results back in a single user message.
            messages.push(ChatMessage::assistant(response.content.clone()));

            let mut result_blocks: Vec<ContentBlock> = Vec::new();
            for tool_use in response.extract_tool_uses() {
                let lookup = normalize_tool_name(&tool_use.name);
                let Some(tool) = tools.get(&lookup) else {
                    log::warn!("Agent {agent_id} requested unknown tool {}", tool_use.name);
                    result_blocks.push(ContentBlock::tool_error(
                        tool_use.id,
                        format!("Unknown tool: {}", tool_use.name),
                    ));
                    continue;
                };

                if !can_perform_action(capabilities, &tool.action_name) {
                    log::warn!(
                        "Agent {agent_id} lacks capability for action {}",
                        tool.action_name
                    );
                    result_blocks.push(ContentBlock::tool_error(
                        tool_use.id,
                        format!("Not permitted to perform action: {}", tool.action_name),
                    ));
                    continue;
                }

                tool_calls += 1;
                if !tool_names.contains(&lookup) {
                    tool_names.push(lookup.clone());
                }

                let (body, is_error) = match self
                    .dispatcher
                    .dispatch(ctx, &tool.action_name, tool_use.input.clone())
                    .await
                {
                    Ok(value) => (value.to_string(), false),
                    Err(e) => {
                        log::warn!("Tool {lookup} dispatch failed: {e}");
                        (format!("Tool call failed: {e}"), true)
                    }
                };

                let filtered = filter_tool_output(&body);
                let wrapped = wrap_tool_result(&lookup, &filtered.content);
                result_blocks.push(if is_error {
                    ContentBlock::tool_error(tool_use.id, wrapped)
                } else {
                    ContentBlock::tool_result(tool_use.id, wrapped)
                });
            }

            messages.push(ChatMessage::tool_results(result_blocks));
        }

        Ok(exhausted(MAX_TURNS_MESSAGE, tool_calls, turns, &tool_names))
    }

    /// Post-completion bookkeeping: response row, command transition,
    /// best-effort memory, audit. None of it can fail the caller.
    async fn finish(
        &self,
        ctx: &RequestContext,
        command: &str,
        agent_id: Uuid,
        command_id: Option<Uuid>,
        output: &ExecutionOutput,
        elapsed: std::time::Duration,
    ) {
        let session_id = command_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let response_row = AgentResponse {
            id: Uuid::new_v4(),
            command_id,
            agent_id,
            session_id: session_id.clone(),
            content: output.response.clone(),
            response_type: "complete".to_string(),
            is_streaming: false,
            metadata: json!({ "tool_calls": output.tool_calls, "turns": output.turns }),
            created_at: Utc::now(),
        };
        if let Err(e) = self.storage.insert_agent_response(response_row).await {
            log::warn!("Could not insert agent response row: {e}");
        }

        if let Some(id) = command_id {
            let patch = json!({ "result": output.response });
            if let Err(e) = self
                .storage
                .update_command_status(id, CommandStatus::Completed, Some(patch))
                .await
            {
                log::warn!("Could not mark command {id} completed: {e}");
            }
        }

        self.memory
            .store(
                agent_id,
                &session_id,
                command_id,
                command,
                &output.response,
                output.tool_names.clone(),
                output.turns,
                0.5,
                elapsed,
            )
            .await;

        let audit = AuditEvent::new("agent", "agent.execute")
            .with_actor_id(agent_id.to_string())
            .with_details(json!({
                "correlation_id": &ctx.correlation_id,
                "tool_calls": output.tool_calls,
                "turns": output.turns,
                "duration_ms": elapsed.as_millis() as u64,
            }));
        if let Err(e) = self.storage.log_audit_event(audit).await {
            log::warn!("Could not log audit event: {e}");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::embedding::{Embedder, EmbedderError};
    use crate::executor::DispatchError;
    use crate::llm::{LlmError, MessagesResponse, StopReason, Usage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Plays back canned responses and counts how often it was called.
    pub struct ScriptedModel {
        responses: Mutex<VecDeque<MessagesResponse>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedModel {
        pub fn new(responses: Vec<MessagesResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn messages(&self, _request: MessagesRequest) -> Result<MessagesResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::OtherError("script exhausted".into()))
        }
    }

    pub fn text_response(text: &str) -> MessagesResponse {
        MessagesResponse {
            id: Uuid::new_v4().to_string(),
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            model: "scripted".into(),
            usage: Usage::default(),
        }
    }

    pub fn tool_use_response(id: &str, name: &str, input: Value) -> MessagesResponse {
        MessagesResponse {
            id: Uuid::new_v4().to_string(),
            content: vec![ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            }],
            stop_reason: StopReason::ToolUse,
            model: "scripted".into(),
            usage: Usage::default(),
        }
    }

    /// Records dispatched actions and returns a canned body per action.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub dispatched: Mutex<Vec<(String, Value)>>,
        pub responses: Mutex<HashMap<String, Value>>,
    }

    impl RecordingDispatcher {
        pub fn respond_with(self, action: &str, body: Value) -> Self {
            self.responses.lock().unwrap().insert(action.into(), body);
            self
        }

        pub fn actions(&self) -> Vec<String> {
            self.dispatched
                .lock()
                .unwrap()
                .iter()
                .map(|(a, _)| a.clone())
                .collect()
        }
    }

    #[async_trait]
    impl InternalDispatcher for RecordingDispatcher {
        async fn dispatch(
            &self,
            _ctx: &RequestContext,
            action: &str,
            params: Value,
        ) -> Result<Value, DispatchError> {
            self.dispatched
                .lock()
                .unwrap()
                .push((action.to_string(), params));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(action)
                .cloned()
                .unwrap_or_else(|| json!({"ok": true})))
        }
    }

    pub struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }
}
