use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::EncryptedPayload;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Oauth2,
    ApiKey,
    Webhook,
    Custom,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Integration {
    pub id: Uuid,
    pub service_name: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub health_check_url: Option<String>,
    pub status: String,
}

/// Encrypted credential payload for one integration. `key_version` lags
/// the current key id until the credential is next read, at which point it
/// is migrated through `re_encrypt`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IntegrationCredential {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub encrypted_payload: EncryptedPayload,
    pub key_version: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl IntegrationCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-use OAuth handshake state. Invalid once `used_at` is set, even
/// before expiry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OAuthState {
    pub state: String,
    pub integration_id: Uuid,
    pub agent_id: Uuid,
    pub redirect_uri: String,
    #[serde(default)]
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TenantPlan {
    Free,
    Starter,
    Business,
    Professional,
    Enterprise,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn credential_expiry() {
        let now = Utc::now();
        let credential = IntegrationCredential {
            id: Uuid::new_v4(),
            integration_id: Uuid::new_v4(),
            encrypted_payload: EncryptedPayload::default(),
            key_version: "key-v1".into(),
            expires_at: Some(now - Duration::seconds(1)),
            last_used_at: None,
        };
        assert!(credential.is_expired(now));
    }
}
