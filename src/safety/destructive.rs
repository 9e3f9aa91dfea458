use crate::schemas::AgentType;

/// Actions with real-world side effects, gated behind the per-agent
/// `allow_destructive` flag.
pub const DESTRUCTIVE_ACTIONS: &[&str] = &[
    "email.send",
    "social.post",
    "finance.payment",
    "code.deploy",
    "crm.update_contact",
    "crm.delete_contact",
    "data.export",
    "calendar.delete_event",
];

pub fn is_destructive(action: &str) -> bool {
    DESTRUCTIVE_ACTIONS.contains(&action)
}

#[derive(Debug, Clone)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl GateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Evaluate the destructive-action gate.
///
/// Non-destructive actions pass through. `tool` agents are denied
/// unconditionally; every other type needs `allow_destructive` on its row.
pub fn verify_destructive(
    action: &str,
    agent_type: AgentType,
    allow_destructive: bool,
) -> GateDecision {
    if !is_destructive(action) {
        return GateDecision::allowed();
    }

    if agent_type == AgentType::Tool {
        return GateDecision::denied(format!(
            "tool agents may never execute destructive action {action}"
        ));
    }

    if !allow_destructive {
        return GateDecision::denied(format!(
            "agent is not permitted to execute destructive action {action}"
        ));
    }

    GateDecision::allowed()
}
