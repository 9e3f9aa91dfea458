use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::EncryptedPayload;

/// How much autonomy an agent has over non-query actions.
///
/// `Tool` agents are restricted to read-only dispatch, `Supervised` agents
/// need an approved confirmation before side-effecting actions, and
/// `Autonomous` agents act on their capability set alone.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Autonomous,
    Supervised,
    Tool,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::Autonomous => write!(f, "autonomous"),
            AgentType::Supervised => write!(f, "supervised"),
            AgentType::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autonomous" => Ok(AgentType::Autonomous),
            "supervised" => Ok(AgentType::Supervised),
            "tool" => Ok(AgentType::Tool),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Suspended,
}

/// An authenticated non-human principal.
///
/// Everything the admission pipeline needs hangs off this row: the
/// capability set, the per-minute rate limit, the destructive-action flag
/// and the optional encrypted HMAC signing secret.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub allow_destructive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret_ciphertext: Option<EncryptedPayload>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
}

impl Agent {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn is_usable(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// One API key issued to an agent. Only the hash is stored; `prefix` keeps
/// the first characters around for display.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentApiKey {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub hashed_key: String,
    pub prefix: String,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_round_trips_through_str() {
        for t in [AgentType::Autonomous, AgentType::Supervised, AgentType::Tool] {
            assert_eq!(t.to_string().parse::<AgentType>().unwrap(), t);
        }
        assert!("robot".parse::<AgentType>().is_err());
    }

    #[test]
    fn capability_lookup() {
        let agent = Agent {
            id: Uuid::new_v4(),
            name: "crm-bot".into(),
            agent_type: AgentType::Autonomous,
            status: AgentStatus::Active,
            capabilities: vec!["crm".into(), "email".into()],
            rate_limit_per_minute: 60,
            allow_destructive: false,
            signing_secret_ciphertext: None,
            last_seen_at: None,
            metadata: Value::Null,
        };
        assert!(agent.has_capability("crm"));
        assert!(!agent.has_capability("finance"));
    }
}
