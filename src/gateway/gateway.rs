use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{verify_shared_secret, AuthOutcome, Authenticator};
use crate::config;
use crate::crypto::{verify_signature, KeyRing};
use crate::executor::AgentExecutor;
use crate::integrations::{self, ProvisionTenantParams};
use crate::ratelimit;
use crate::registry::{can_perform_action, capability_for, route_for, ActionRoute};
use crate::safety::{is_destructive, verify_destructive};
use crate::schemas::{
    AgentCommand, AgentConfirmation, AgentType, AuditEvent, ConfirmationStatus, RequestContext,
    TriggerType,
};
use crate::storage::Storage;
use crate::workflow::{RunParams, WorkflowExecutor};

use super::{
    validate_fields, validate_payload, FieldRule, FieldType, GatewayError, MAX_BODY_BYTES,
};

/// Headers the gateway cares about, already plucked off the request.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    pub content_type: Option<String>,
    pub agent_key: Option<String>,
    pub scheduler_secret: Option<String>,
    pub provisioning_secret: Option<String>,
    pub signature: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

enum Principal {
    Agent(Box<AuthOutcome>),
    Scheduler,
}

impl Principal {
    fn agent(&self) -> Option<&crate::schemas::Agent> {
        match self {
            Principal::Agent(outcome) => Some(&outcome.agent),
            Principal::Scheduler => None,
        }
    }

    fn actor_type(&self) -> &'static str {
        match self {
            Principal::Agent(_) => "agent",
            Principal::Scheduler => "scheduler",
        }
    }

    fn actor_id(&self) -> Option<String> {
        self.agent().map(|a| a.id.to_string())
    }
}

fn request_rules() -> [FieldRule; 3] {
    [
        FieldRule::new("action")
            .required()
            .of_type(FieldType::String)
            .max_len(200)
            .pattern(r"^[a-z0-9_]+(\.[a-z0-9_]+)*$"),
        FieldRule::new("params").of_type(FieldType::Object),
        FieldRule::new("correlation_id").of_type(FieldType::String).max_len(128),
    ]
}

/// The single entry point: authentication, capability and agent-type
/// enforcement, the destructive gate, signature verification, dispatch,
/// and audit, in that order, fail-fast.
pub struct Gateway {
    storage: Arc<dyn Storage>,
    authenticator: Authenticator,
    workflow: Arc<WorkflowExecutor>,
    executor: Arc<AgentExecutor>,
    keys: KeyRing,
    http: reqwest::Client,
    functions_base_url: Option<String>,
    scheduler_secret: Option<SecretString>,
}

impl Gateway {
    pub fn new(
        storage: Arc<dyn Storage>,
        workflow: Arc<WorkflowExecutor>,
        executor: Arc<AgentExecutor>,
        keys: KeyRing,
    ) -> Self {
        Self {
            authenticator: Authenticator::new(storage.clone()),
            storage,
            workflow,
            executor,
            keys,
            http: reqwest::Client::new(),
            functions_base_url: None,
            scheduler_secret: None,
        }
    }

    /// Override the internal-dispatch base URL; configuration is
    /// consulted otherwise.
    pub fn with_functions_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.functions_base_url = Some(base_url.into());
        self
    }

    pub fn with_scheduler_secret(mut self, secret: SecretString) -> Self {
        self.scheduler_secret = Some(secret);
        self
    }

    fn scheduler_secret(&self) -> Result<SecretString, GatewayError> {
        match &self.scheduler_secret {
            Some(secret) => Ok(secret.clone()),
            None => Ok(config::scheduler_secret()?),
        }
    }

    /// Handle one request end to end. Never fails: every error becomes the
    /// JSON envelope with its mapped status.
    pub async fn handle(&self, headers: RequestHeaders, body: &[u8]) -> GatewayResponse {
        let correlation_id = headers
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let ctx = RequestContext::new(correlation_id.clone());
        let started = tokio::time::Instant::now();

        let mut response = match self.process(&ctx, &headers, body).await {
            Ok(response) => response,
            Err(e) => {
                let mut response_headers = Vec::new();
                if let GatewayError::RateLimited { decision } = &e {
                    for (name, value) in ratelimit::headers_for(decision) {
                        response_headers.push((name.to_string(), value));
                    }
                }
                GatewayResponse {
                    status: e.status(),
                    body: e.envelope(&correlation_id),
                    headers: response_headers,
                }
            }
        };
        response
            .headers
            .push(("X-Correlation-Id".to_string(), correlation_id.clone()));

        log::info!(
            "{}",
            json!({
                "level": "info",
                "correlation_id": correlation_id,
                "path": "/api-gateway",
                "method": "POST",
                "status": response.status,
                "duration_ms": started.elapsed().as_millis() as u64,
            })
        );
        response
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        headers: &RequestHeaders,
        body: &[u8],
    ) -> Result<GatewayResponse, GatewayError> {
        // 1. Input validation.
        let json_content = headers
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.split(';').next().unwrap_or("").trim() == "application/json");
        if !json_content {
            return Err(GatewayError::Validation(
                "Content-Type must be application/json".into(),
            ));
        }
        if body.len() > MAX_BODY_BYTES {
            return Err(GatewayError::Validation(format!(
                "request body exceeds {MAX_BODY_BYTES} bytes"
            )));
        }
        let parsed: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::Validation(format!("malformed JSON: {e}")))?;
        validate_payload(&parsed).map_err(GatewayError::Validation)?;
        validate_fields(&parsed, &request_rules()).map_err(GatewayError::Validation)?;

        let action = parsed["action"].as_str().unwrap_or_default().to_string();
        let params = parsed.get("params").cloned().unwrap_or_else(|| json!({}));

        // 2. The action must be registered.
        if capability_for(&action).is_none() {
            return Err(GatewayError::Validation(format!("Unknown action: {action}")));
        }
        let route = route_for(&action);

        // 3. Authentication: agent key, or the shared scheduler secret for
        // internal callers.
        let principal = match (&headers.agent_key, &headers.scheduler_secret) {
            (None, Some(secret)) => {
                verify_shared_secret(Some(secret), &self.scheduler_secret()?)
                    .map_err(GatewayError::from)?;
                Principal::Scheduler
            }
            (agent_key, _) => Principal::Agent(Box::new(
                self.authenticator.authenticate(agent_key.as_deref()).await?,
            )),
        };

        // 4-7. Agent-scoped gates; internal callers are already trusted.
        if let Principal::Agent(outcome) = &principal {
            let agent = &outcome.agent;

            if !can_perform_action(&agent.capabilities, &action) {
                return Err(GatewayError::Permission(format!(
                    "Missing capability for action {action}"
                )));
            }

            match agent.agent_type {
                AgentType::Tool if route != ActionRoute::Query => {
                    return Err(GatewayError::Permission(
                        "tool agents may only perform query actions".into(),
                    ));
                }
                AgentType::Supervised if route != ActionRoute::Query => {
                    if let Some(response) = self
                        .supervised_gate(ctx, agent.id, &action)
                        .await?
                    {
                        return Ok(response);
                    }
                }
                _ => {}
            }

            if is_destructive(&action) {
                let decision =
                    verify_destructive(&action, agent.agent_type, agent.allow_destructive);
                if !decision.allowed {
                    self.audit(
                        &principal,
                        "gateway.destructive_blocked",
                        json!({
                            "action": action.clone(),
                            "correlation_id": &ctx.correlation_id,
                            "reason": decision.reason.clone(),
                        }),
                    )
                    .await;
                    return Err(GatewayError::Permission(
                        decision.reason.unwrap_or_else(|| "destructive action denied".into()),
                    ));
                }
            }

            if let (Some(signature), Some(ciphertext)) =
                (&headers.signature, &agent.signing_secret_ciphertext)
            {
                let secret = self.keys.decrypt(ciphertext).map_err(GatewayError::from)?;
                let secret = secret.as_str().ok_or_else(|| {
                    GatewayError::Internal("signing secret is not a string".into())
                })?;
                verify_signature(secret.as_bytes(), signature, body, Utc::now().timestamp())?;
            }
        }

        // Pre-dispatch audit; the post-dispatch event repeats the same
        // action and actor so the two can be joined.
        let audited_action = format!("gateway.{action}");
        self.audit(
            &principal,
            &audited_action,
            json!({ "phase": "dispatch", "correlation_id": &ctx.correlation_id }),
        )
        .await;

        // 8. Dispatch.
        let dispatch_started = tokio::time::Instant::now();
        let (status, data) = self
            .dispatch(ctx, headers, &principal, route, &action, params)
            .await?;
        let duration_ms = dispatch_started.elapsed().as_millis() as u64;

        // 9. Post-dispatch audit and the success envelope.
        self.audit(
            &principal,
            &audited_action,
            json!({
                "phase": "complete",
                "outcome": "success",
                "correlation_id": &ctx.correlation_id,
                "duration_ms": duration_ms,
            }),
        )
        .await;

        let mut meta = json!({ "action": action, "duration_ms": duration_ms });
        let mut response_headers = Vec::new();
        if let Principal::Agent(outcome) = &principal {
            meta["agent_id"] = json!(outcome.agent.id);
            meta["rate_limit"] = json!({
                "limit": outcome.rate_limit.limit,
                "remaining": outcome.rate_limit.remaining,
            });
            for (name, value) in ratelimit::headers_for(&outcome.rate_limit) {
                response_headers.push((name.to_string(), value));
            }
        }

        Ok(GatewayResponse {
            status,
            body: json!({
                "request_id": Uuid::new_v4(),
                "status": "success",
                "data": data,
                "meta": meta,
            }),
            headers: response_headers,
        })
    }

    /// Supervised agents need an approved confirmation for non-query
    /// actions. Returns the 202 response when the request must wait.
    async fn supervised_gate(
        &self,
        ctx: &RequestContext,
        agent_id: Uuid,
        action: &str,
    ) -> Result<Option<GatewayResponse>, GatewayError> {
        match self.storage.find_confirmation(agent_id, action).await? {
            Some(confirmation) if confirmation.status == ConfirmationStatus::Approved => Ok(None),
            Some(confirmation) if confirmation.status == ConfirmationStatus::Rejected => {
                Err(GatewayError::Permission(format!(
                    "action {action} was rejected by a supervisor"
                )))
            }
            existing => {
                if existing.is_none() {
                    self.storage
                        .insert_confirmation(AgentConfirmation {
                            id: Uuid::new_v4(),
                            agent_id,
                            action: action.to_string(),
                            status: ConfirmationStatus::Pending,
                            created_at: Utc::now(),
                            resolved_at: None,
                        })
                        .await?;
                }
                Ok(Some(GatewayResponse {
                    status: 202,
                    body: json!({
                        "error": "Approval required",
                        "confirmation_pending": true,
                        "correlationId": &ctx.correlation_id,
                    }),
                    headers: Vec::new(),
                }))
            }
        }
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        headers: &RequestHeaders,
        principal: &Principal,
        route: ActionRoute,
        action: &str,
        params: Value,
    ) -> Result<(u16, Value), GatewayError> {
        match route {
            ActionRoute::Workflow => self.dispatch_workflow(ctx, principal, action, params).await,
            ActionRoute::Query => self.dispatch_query(action, &params).await,
            ActionRoute::Agent => self.dispatch_agent(ctx, principal, action, params).await,
            ActionRoute::Integration => match action {
                "integration.status" => {
                    let rows = self.storage.fetch_rows("integrations", "*", 50).await?;
                    Ok((200, json!({ "integrations": rows })))
                }
                _ => self.forward(ctx, action, params).await,
            },
            ActionRoute::System => match action {
                "system.health" => Ok((200, json!({ "status": "ok" }))),
                "system.provision_tenant" => {
                    self.dispatch_provision(headers, params).await
                }
                _ => self.forward(ctx, action, params).await,
            },
        }
    }

    async fn dispatch_workflow(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        action: &str,
        params: Value,
    ) -> Result<(u16, Value), GatewayError> {
        match action {
            "workflow.execute" => {
                let workflow_id = params
                    .get("workflow_id")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        GatewayError::Validation("params.workflow_id must be a UUID".into())
                    })?;
                let trigger_type = match params.get("trigger_type") {
                    None | Some(Value::Null) => TriggerType::Manual,
                    Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                        GatewayError::Validation("params.trigger_type is invalid".into())
                    })?,
                };

                let agent_id = principal.agent().map(|a| a.id);
                let mut trigger_data = params;
                if let Value::Object(map) = &mut trigger_data {
                    map.insert("source".into(), json!("api-gateway"));
                    map.insert("agent_id".into(), json!(agent_id));
                }

                // The executor is invoked on the internal channel; the
                // request was already authenticated here.
                let run = self
                    .workflow
                    .run(
                        ctx,
                        RunParams {
                            workflow_id,
                            trigger_type,
                            trigger_data,
                            agent_id,
                            scheduler_authorized: true,
                        },
                    )
                    .await?;
                Ok((200, serde_json::to_value(run).map_err(|e| {
                    GatewayError::Internal(e.to_string())
                })?))
            }
            "workflow.status" => {
                let run_id = params
                    .get("run_id")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        GatewayError::Validation("params.run_id must be a UUID".into())
                    })?;
                let run = self
                    .storage
                    .get_workflow_run(run_id)
                    .await?
                    .ok_or_else(|| GatewayError::NotFound(format!("workflow_run {run_id}")))?;
                Ok((200, serde_json::to_value(run).map_err(|e| {
                    GatewayError::Internal(e.to_string())
                })?))
            }
            other => Err(GatewayError::Validation(format!("Unknown action: {other}"))),
        }
    }

    async fn dispatch_query(
        &self,
        action: &str,
        params: &Value,
    ) -> Result<(u16, Value), GatewayError> {
        let table = action.strip_prefix("query.").unwrap_or(action);
        let select = params
            .get("select")
            .and_then(Value::as_str)
            .unwrap_or("*");
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(50)
            .min(1_000) as usize;

        let rows = self.storage.fetch_rows(table, select, limit).await?;
        Ok((200, json!({ "rows": rows, "count": rows.len() })))
    }

    async fn dispatch_agent(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        action: &str,
        params: Value,
    ) -> Result<(u16, Value), GatewayError> {
        // Internal callers may act on behalf of a named agent; API callers
        // are always scoped to themselves.
        let resolve_agent = || async {
            match principal.agent() {
                Some(agent) => Ok::<_, GatewayError>(agent.clone()),
                None => {
                    let agent_id = params
                        .get("agent_id")
                        .and_then(Value::as_str)
                        .and_then(|s| Uuid::parse_str(s).ok())
                        .ok_or_else(|| {
                            GatewayError::Validation("params.agent_id must be a UUID".into())
                        })?;
                    self.storage
                        .get_agent(agent_id)
                        .await?
                        .ok_or_else(|| GatewayError::NotFound(format!("agent {agent_id}")))
                }
            }
        };

        match action {
            "agent.status" => {
                let agent = resolve_agent().await?;
                Ok((
                    200,
                    json!({
                        "agent_id": agent.id,
                        "name": agent.name,
                        "type": agent.agent_type,
                        "status": agent.status,
                        "last_seen_at": agent.last_seen_at,
                    }),
                ))
            }
            "agent.capabilities" => {
                let agent = resolve_agent().await?;
                Ok((200, json!({ "capabilities": agent.capabilities })))
            }
            "agent.execute" => {
                let agent = resolve_agent().await?;
                let command_text = params
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::Validation("params.command must be a string".into())
                    })?;

                let command = AgentCommand::new(agent.id, command_text);
                let command_id = command.id;
                self.storage.insert_agent_command(command).await?;

                let output = self
                    .executor
                    .execute(
                        ctx,
                        command_text,
                        agent.id,
                        &agent.capabilities,
                        Some(command_id),
                    )
                    .await?;
                Ok((
                    200,
                    json!({
                        "command_id": command_id,
                        "response": output.response,
                        "tool_calls": output.tool_calls,
                        "turns": output.turns,
                        "tool_names": output.tool_names,
                    }),
                ))
            }
            other => Err(GatewayError::Validation(format!("Unknown action: {other}"))),
        }
    }

    async fn dispatch_provision(
        &self,
        headers: &RequestHeaders,
        params: Value,
    ) -> Result<(u16, Value), GatewayError> {
        let field = |name: &str| -> Result<String, GatewayError> {
            params
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| GatewayError::Validation(format!("params.{name} is required")))
        };
        let plan = match params.get("plan") {
            None | Some(Value::Null) => crate::schemas::TenantPlan::Free,
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| GatewayError::Validation("params.plan is invalid".into()))?,
        };

        let (tenant_id, created_at) = integrations::provision_tenant(
            self.storage.as_ref(),
            headers.provisioning_secret.as_deref(),
            ProvisionTenantParams {
                name: field("name")?,
                slug: field("slug")?,
                tenant_type: field("type")?,
                admin_email: field("admin_email")?,
                plan,
                branding: params.get("branding").cloned().unwrap_or(Value::Null),
            },
        )
        .await?;

        Ok((201, json!({ "tenant_id": tenant_id, "created_at": created_at })))
    }

    /// Forward a system action to the internal handler named after it.
    async fn forward(
        &self,
        ctx: &RequestContext,
        action: &str,
        params: Value,
    ) -> Result<(u16, Value), GatewayError> {
        let base = match &self.functions_base_url {
            Some(base) => base.clone(),
            None => config::functions_base_url()?,
        };
        let secret = self.scheduler_secret()?;

        let response = self
            .http
            .post(format!("{base}/functions/v1/{action}"))
            .header("x-scheduler-secret", secret.expose_secret())
            .header("x-correlation-id", &ctx.correlation_id)
            .json(&params)
            .timeout(ctx.deadline.remaining())
            .send()
            .await
            .map_err(|e| GatewayError::Upstream {
                status: 502,
                body: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream { status, body });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Upstream {
                status: 502,
                body: e.to_string(),
            })?;
        Ok((status, body))
    }

    async fn audit(&self, principal: &Principal, action: &str, details: Value) {
        let mut event = AuditEvent::new(principal.actor_type(), action).with_details(details);
        if let Some(actor_id) = principal.actor_id() {
            event = event.with_actor_id(actor_id);
        }
        if let Err(e) = self.storage.log_audit_event(event).await {
            log::warn!("Could not log audit event {action}: {e}");
        }
    }
}
