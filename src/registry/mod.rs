//! Compiled-in action registry: which capability an action needs and which
//! route executes it. Unknown actions are denied by default.

/// Where the gateway sends an authorized action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRoute {
    /// Read against the table named by the action suffix.
    Query,
    /// Workflow executor.
    Workflow,
    /// Integration handler.
    Integration,
    /// Internal agent handler.
    Agent,
    /// Generic system handler named after the action itself.
    System,
}

/// Required capability for an action. `Some("")` marks a system action
/// that needs no capability; `None` means the action is unknown.
pub fn capability_for(action: &str) -> Option<&'static str> {
    let capability = match action {
        "crm.search" | "crm.get_contact" | "crm.update_contact" | "crm.delete_contact" => "crm",
        "email.send" | "email.search" | "email.draft" => "email",
        "calendar.create_event" | "calendar.list_events" | "calendar.delete_event" => "calendar",
        "tasks.create" | "tasks.list" | "tasks.complete" => "tasks",
        "docs.search" | "docs.create" => "docs",
        "social.post" => "social",
        "finance.payment" | "finance.balance" => "finance",
        "code.deploy" => "code",
        "data.export" => "data",

        "workflow.execute" | "workflow.status" => "workflows",
        "integration.connect" | "integration.disconnect" | "integration.action" => "integrations",

        // Table reads; the gateway's query route resolves the suffix.
        "query.agents"
        | "query.agent_commands"
        | "query.agent_responses"
        | "query.workflows"
        | "query.workflow_runs"
        | "query.orchestration_runs"
        | "query.orchestration_responses"
        | "query.integrations"
        | "query.tool_definitions" => "",

        // System actions, no capability required.
        "agent.status" | "agent.capabilities" | "agent.execute" => "",
        "integration.status" => "",
        "system.health" | "system.provision_tenant" => "",

        _ => return None,
    };
    Some(capability)
}

/// Route by action prefix.
pub fn route_for(action: &str) -> ActionRoute {
    match action.split_once('.').map(|(prefix, _)| prefix) {
        Some("query") => ActionRoute::Query,
        Some("workflow") => ActionRoute::Workflow,
        Some("integration") => ActionRoute::Integration,
        Some("agent") => ActionRoute::Agent,
        _ => ActionRoute::System,
    }
}

/// True iff the action is known and either needs no capability or the
/// agent holds the required one.
pub fn can_perform_action(capabilities: &[String], action: &str) -> bool {
    match capability_for(action) {
        Some("") => true,
        Some(required) => capabilities.iter().any(|c| c == required),
        None => false,
    }
}
