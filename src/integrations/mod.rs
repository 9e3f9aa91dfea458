//! Integration credentials, OAuth handshake state, and tenant
//! provisioning.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::auth::{verify_provisioning_secret, AuthError};
use crate::crypto::{CryptoError, KeyRing};
use crate::schemas::{IntegrationCredential, OAuthState, TenantPlan};
use crate::storage::{Storage, StorageError};

/// OAuth states are valid for five minutes from issuance.
pub const OAUTH_STATE_TTL_MINUTES: i64 = 5;

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Credential has expired")]
    CredentialExpired,

    #[error("OAuth state has expired")]
    StateExpired,

    #[error("OAuth state already used")]
    StateUsed,

    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),
}

/// Encrypted credential storage with lazy key-rotation migration.
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
    keys: KeyRing,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>, keys: KeyRing) -> Self {
        Self { storage, keys }
    }

    pub async fn store(
        &self,
        integration_id: Uuid,
        payload: &Value,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), IntegrationError> {
        let encrypted = self.keys.encrypt_current(payload)?;
        self.storage
            .upsert_integration_credential(IntegrationCredential {
                id: Uuid::new_v4(),
                integration_id,
                key_version: encrypted.key_id.clone(),
                encrypted_payload: encrypted,
                expires_at,
                last_used_at: None,
            })
            .await?;
        Ok(())
    }

    /// Decrypt the credential for an integration.
    ///
    /// Rows encrypted under an older key id are migrated through
    /// `re_encrypt` on the way out; a migration failure only logs, since
    /// the caller already has the plaintext it asked for.
    pub async fn fetch(&self, integration_id: Uuid) -> Result<Value, IntegrationError> {
        let mut credential = self
            .storage
            .get_integration_credential(integration_id)
            .await?
            .ok_or_else(|| IntegrationError::NotFound(format!("credential for {integration_id}")))?;

        if credential.is_expired(Utc::now()) {
            return Err(IntegrationError::CredentialExpired);
        }

        let plaintext = self.keys.decrypt(&credential.encrypted_payload)?;

        credential.last_used_at = Some(Utc::now());
        if credential.encrypted_payload.key_id != self.keys.current_key_id() {
            match self.keys.re_encrypt(&credential.encrypted_payload) {
                Ok(migrated) => {
                    credential.key_version = migrated.key_id.clone();
                    credential.encrypted_payload = migrated;
                }
                Err(e) => log::warn!(
                    "Credential re-encryption failed for integration {integration_id}: {e}"
                ),
            }
        }
        if let Err(e) = self.storage.upsert_integration_credential(credential).await {
            log::warn!("Could not persist credential touch for {integration_id}: {e}");
        }

        Ok(plaintext)
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Begin an OAuth handshake: validate the redirect target and persist a
/// single-use state token.
pub async fn initiate_oauth(
    storage: &dyn Storage,
    integration_id: Uuid,
    agent_id: Uuid,
    redirect_uri: &str,
) -> Result<OAuthState, IntegrationError> {
    Url::parse(redirect_uri)
        .map_err(|e| IntegrationError::InvalidRedirectUri(format!("{redirect_uri}: {e}")))?;

    let state = OAuthState {
        state: random_state(),
        integration_id,
        agent_id,
        redirect_uri: redirect_uri.to_string(),
        used_at: None,
        expires_at: Utc::now() + Duration::minutes(OAUTH_STATE_TTL_MINUTES),
    };
    storage.insert_oauth_state(state.clone()).await?;
    Ok(state)
}

/// Build the provider authorize URL for an initiated handshake.
pub fn build_authorize_url(
    authorize_endpoint: &str,
    client_id: &str,
    state: &OAuthState,
) -> String {
    format!(
        "{authorize_endpoint}?response_type=code&client_id={}&redirect_uri={}&state={}",
        urlencoding::encode(client_id),
        urlencoding::encode(&state.redirect_uri),
        urlencoding::encode(&state.state),
    )
}

/// Consume a state at callback time. The consume is atomic and happens
/// before expiry is considered, so a raced second callback always sees
/// the used marker.
pub async fn complete_oauth(
    storage: &dyn Storage,
    state: &str,
) -> Result<OAuthState, IntegrationError> {
    let row = storage.consume_oauth_state(state).await.map_err(|e| match e {
        StorageError::Conflict(_) => IntegrationError::StateUsed,
        StorageError::NotFound(_) => IntegrationError::NotFound("oauth_state".into()),
        other => IntegrationError::StorageError(other),
    })?;

    if row.expires_at <= Utc::now() {
        return Err(IntegrationError::StateExpired);
    }
    Ok(row)
}

#[derive(Debug, Clone)]
pub struct ProvisionTenantParams {
    pub name: String,
    pub slug: String,
    pub tenant_type: String,
    pub admin_email: String,
    pub plan: TenantPlan,
    pub branding: Value,
}

/// Create a tenant. Guarded by the provisioning shared secret rather than
/// agent authentication.
pub async fn provision_tenant(
    storage: &dyn Storage,
    provisioning_secret: Option<&str>,
    params: ProvisionTenantParams,
) -> Result<(Uuid, chrono::DateTime<Utc>), IntegrationError> {
    verify_provisioning_secret(provisioning_secret)?;
    Ok(storage
        .provision_tenant(
            &params.name,
            &params.slug,
            &params.tenant_type,
            &params.admin_email,
            params.plan,
            params.branding,
        )
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use secrecy::SecretString;
    use serde_json::json;

    fn test_keys() -> KeyRing {
        KeyRing::new("key-v2")
            .with_secret("key-v2", SecretString::from("current"))
            .with_secret("key-v1", SecretString::from("legacy"))
    }

    #[tokio::test]
    async fn credential_round_trip_and_rotation() {
        let storage = Arc::new(InMemoryStorage::new());
        let keys = test_keys();
        let integration_id = Uuid::new_v4();
        let secret = json!({"access_token": "tok_live_1"});

        // Seed a legacy-key credential directly.
        let legacy = keys.encrypt(&secret, "key-v1").unwrap();
        storage
            .upsert_integration_credential(IntegrationCredential {
                id: Uuid::new_v4(),
                integration_id,
                key_version: "key-v1".into(),
                encrypted_payload: legacy,
                expires_at: None,
                last_used_at: None,
            })
            .await
            .unwrap();

        let store = CredentialStore::new(storage.clone(), keys);
        let plaintext = store.fetch(integration_id).await.unwrap();
        assert_eq!(plaintext, secret);

        // Fetch migrated the stored payload to the current key.
        let migrated = storage
            .get_integration_credential(integration_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(migrated.key_version, "key-v2");
        assert_eq!(migrated.encrypted_payload.key_id, "key-v2");
        assert!(migrated.last_used_at.is_some());
    }

    #[tokio::test]
    async fn expired_credentials_are_refused() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = CredentialStore::new(storage.clone(), test_keys());
        let integration_id = Uuid::new_v4();

        store
            .store(
                integration_id,
                &json!({"k": "v"}),
                Some(Utc::now() - Duration::hours(1)),
            )
            .await
            .unwrap();

        assert!(matches!(
            store.fetch(integration_id).await.unwrap_err(),
            IntegrationError::CredentialExpired
        ));
    }

    #[tokio::test]
    async fn oauth_state_lifecycle() {
        let storage = InMemoryStorage::new();
        let state = initiate_oauth(
            &storage,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "https://app.example.com/oauth/callback",
        )
        .await
        .unwrap();
        assert_eq!(state.state.len(), 32);

        let url = build_authorize_url("https://provider.example.com/authorize", "client-1", &state);
        assert!(url.contains("state="));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Foauth%2Fcallback"));

        let consumed = complete_oauth(&storage, &state.state).await.unwrap();
        assert_eq!(consumed.agent_id, state.agent_id);

        assert!(matches!(
            complete_oauth(&storage, &state.state).await.unwrap_err(),
            IntegrationError::StateUsed
        ));
    }

    #[tokio::test]
    async fn bad_redirect_uri_is_rejected() {
        let storage = InMemoryStorage::new();
        assert!(matches!(
            initiate_oauth(&storage, Uuid::new_v4(), Uuid::new_v4(), "not a url").await,
            Err(IntegrationError::InvalidRedirectUri(_))
        ));
    }

    #[tokio::test]
    async fn unknown_state_is_not_found() {
        let storage = InMemoryStorage::new();
        assert!(matches!(
            complete_oauth(&storage, "missing").await.unwrap_err(),
            IntegrationError::NotFound(_)
        ));
    }
}
