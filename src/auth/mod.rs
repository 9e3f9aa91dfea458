use std::sync::Arc;

use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::{self, ConfigError, AGENT_KEY_PREFIX};
use crate::ratelimit::{FixedWindowLimiter, RateLimitDecision};
use crate::schemas::Agent;
use crate::storage::{Storage, StorageError};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing agent key")]
    MissingKey,

    #[error("Malformed agent key")]
    BadPrefix,

    #[error("Invalid agent key")]
    InvalidKey,

    #[error("Agent is {0}")]
    AgentDisabled(String),

    #[error("Rate limit exceeded")]
    RateLimited { decision: RateLimitDecision },

    #[error("Invalid shared secret")]
    InvalidSharedSecret,

    #[error("Missing configuration: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

#[derive(Debug)]
pub struct AuthOutcome {
    pub agent: Agent,
    pub rate_limit: RateLimitDecision,
}

/// API-key authentication plus per-agent admission control.
///
/// The per-agent limiter is in-process and keyed on agent id; each check
/// is sized to that agent's configured per-minute limit. `last_seen_at`
/// is touched on a detached task so the response never waits for it.
pub struct Authenticator {
    storage: Arc<dyn Storage>,
    limiter: FixedWindowLimiter,
}

impl Authenticator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            limiter: FixedWindowLimiter::per_minute(),
        }
    }

    pub async fn authenticate(&self, agent_key: Option<&str>) -> Result<AuthOutcome, AuthError> {
        let key = agent_key.ok_or(AuthError::MissingKey)?;
        if !key.starts_with(AGENT_KEY_PREFIX) {
            return Err(AuthError::BadPrefix);
        }

        let agent = self
            .storage
            .verify_agent_api_key(key)
            .await?
            .ok_or(AuthError::InvalidKey)?;

        if !agent.is_usable() {
            let status = serde_json::to_value(agent.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "disabled".to_string());
            return Err(AuthError::AgentDisabled(status));
        }

        let decision = self.limiter.check(
            &format!("agent:{}", agent.id),
            agent.rate_limit_per_minute,
        );
        if !decision.allowed {
            return Err(AuthError::RateLimited { decision });
        }

        let storage = Arc::clone(&self.storage);
        let agent_id = agent.id;
        tokio::spawn(async move {
            if let Err(e) = storage.touch_agent_last_seen(agent_id).await {
                log::warn!("Failed to touch last_seen_at for agent {agent_id}: {e}");
            }
        });

        Ok(AuthOutcome {
            agent,
            rate_limit: decision,
        })
    }
}

/// Constant-time check of a shared secret header against its configured
/// value. Used for the scheduler and provisioning channels.
pub fn verify_shared_secret(
    provided: Option<&str>,
    expected: &secrecy::SecretString,
) -> Result<(), AuthError> {
    let provided = provided.ok_or(AuthError::InvalidSharedSecret)?;
    let expected = expected.expose_secret();
    if provided.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(AuthError::InvalidSharedSecret)
    }
}

pub fn verify_scheduler_secret(provided: Option<&str>) -> Result<(), AuthError> {
    let expected = config::scheduler_secret()?;
    verify_shared_secret(provided, &expected)
}

pub fn verify_provisioning_secret(provided: Option<&str>) -> Result<(), AuthError> {
    let expected = config::provisioning_secret()?;
    verify_shared_secret(provided, &expected)
}
