use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::executor::AgentError;
use crate::integrations::IntegrationError;
use crate::llm::LlmError;
use crate::orchestrator::OrchestratorError;
use crate::ratelimit::RateLimitDecision;
use crate::storage::StorageError;
use crate::workflow::WorkflowError;

/// Everything the gateway can refuse a request with, shaped so each kind
/// maps onto exactly one HTTP status.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded")]
    RateLimited { decision: RateLimitDecision },

    #[error("{0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Upstream failure ({status})")]
    Upstream { status: u16, body: String },

    #[error("Internal error")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::Permission(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::Conflict(_) => 409,
            GatewayError::Gone(_) => 410,
            GatewayError::Upstream { status, .. } => {
                // Pass a downstream HTTP status through; network-level
                // failures come in as 502 already.
                if *status >= 400 {
                    *status
                } else {
                    502
                }
            }
            GatewayError::Internal(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Unauthorized(_) => "auth_error",
            GatewayError::RateLimited { .. } => "rate_limit_error",
            GatewayError::Permission(_) => "permission_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::Gone(_) => "gone",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// The JSON error envelope. 5xx bodies never leak internals, only the
    /// correlation id.
    pub fn envelope(&self, correlation_id: &str) -> Value {
        let message = match self {
            GatewayError::Internal(detail) => {
                log::error!("Internal error [{correlation_id}]: {detail}");
                "An internal error occurred".to_string()
            }
            GatewayError::Upstream { body, .. } => {
                log::warn!("Upstream failure [{correlation_id}]: {body}");
                "Upstream request failed".to_string()
            }
            other => other.to_string(),
        };

        let mut envelope = json!({
            "error": self.kind(),
            "message": message,
            "correlationId": correlation_id,
        });
        if let GatewayError::RateLimited { decision } = self {
            envelope["rateLimit"] = json!({
                "limit": decision.limit,
                "remaining": decision.remaining,
                "resetAt": decision.reset_at.timestamp(),
                "retryAfter": decision.retry_after_secs,
            });
        }
        envelope
    }
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::RateLimited { decision } => GatewayError::RateLimited { decision },
            AuthError::StorageError(inner) => GatewayError::Internal(inner.to_string()),
            AuthError::ConfigError(inner) => GatewayError::Internal(inner.to_string()),
            other => GatewayError::Unauthorized(other.to_string()),
        }
    }
}

impl From<StorageError> for GatewayError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => GatewayError::NotFound(what),
            StorageError::Conflict(what) => GatewayError::Conflict(what),
            StorageError::TerminalState(what) => GatewayError::Conflict(what),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<WorkflowError> for GatewayError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound(what) => GatewayError::NotFound(what),
            WorkflowError::ValidationError(message) => GatewayError::Validation(message),
            WorkflowError::Unauthorized(message) => GatewayError::Unauthorized(message),
            WorkflowError::StorageError(inner) => inner.into(),
        }
    }
}

impl From<IntegrationError> for GatewayError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::CredentialExpired => {
                GatewayError::Gone("credential has expired".into())
            }
            IntegrationError::StateUsed => GatewayError::Conflict("OAuth state already used".into()),
            IntegrationError::StateExpired => {
                GatewayError::Unauthorized("OAuth state has expired".into())
            }
            IntegrationError::NotFound(what) => GatewayError::NotFound(what),
            IntegrationError::InvalidRedirectUri(message) => GatewayError::Validation(message),
            IntegrationError::AuthError(inner) => inner.into(),
            IntegrationError::StorageError(inner) => inner.into(),
            IntegrationError::CryptoError(inner) => GatewayError::Internal(inner.to_string()),
        }
    }
}

impl From<AgentError> for GatewayError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::LlmError(LlmError::UpstreamError { status, body }) => {
                GatewayError::Upstream { status, body }
            }
            AgentError::LlmError(inner) => GatewayError::Upstream {
                status: 502,
                body: inner.to_string(),
            },
            AgentError::DispatchError(inner) => GatewayError::Upstream {
                status: 502,
                body: inner.to_string(),
            },
            AgentError::StorageError(inner) => inner.into(),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for GatewayError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::NoAgents => GatewayError::Validation(e.to_string()),
            OrchestratorError::StorageError(inner) => inner.into(),
        }
    }
}

impl From<CryptoError> for GatewayError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::MalformedSignature(_)
            | CryptoError::StaleTimestamp
            | CryptoError::SignatureMismatch => GatewayError::Unauthorized(e.to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(e: ConfigError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}
