use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Append-only audit record. Emission is always best-effort and never
/// fails the request that produced it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditEvent {
    pub actor_type: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub details: Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(actor_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            actor_type: actor_type.into(),
            actor_id: None,
            action: action.into(),
            resource_type: None,
            resource_id: None,
            details: Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
