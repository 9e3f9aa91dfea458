//! Process configuration, read lazily from the environment.
//!
//! Nothing here is required at startup: each accessor is consulted at the
//! point of use and a missing variable fails only the request that needed
//! it.

use secrecy::SecretString;
use thiserror::Error;

/// Product prefix every issued agent API key carries.
pub const AGENT_KEY_PREFIX: &str = "agf_";

/// Key id new envelopes are encrypted under when `ENCRYPTION_KEY_ID` is
/// unset.
pub const DEFAULT_KEY_ID: &str = "key-v2";

/// Legacy key id whose master secret aliases the storage service-role key.
pub const LEGACY_KEY_ID: &str = "key-v1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),
}

fn var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn secret(name: &'static str) -> Result<SecretString, ConfigError> {
    var(name).map(SecretString::from)
}

pub fn storage_url() -> Result<String, ConfigError> {
    var("STORAGE_URL")
}

pub fn storage_service_key() -> Result<SecretString, ConfigError> {
    secret("STORAGE_SERVICE_KEY")
}

/// Base URL for internal dispatch (`POST <base>/functions/v1/<handler>`).
pub fn functions_base_url() -> Result<String, ConfigError> {
    var("FUNCTIONS_BASE_URL")
}

pub fn llm_api_key() -> Result<SecretString, ConfigError> {
    secret("CLAUDE_API_KEY")
}

pub fn llm_model() -> String {
    std::env::var("CLAUDE_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet-20240620".to_string())
}

pub fn embedding_api_key() -> Option<SecretString> {
    secret("EMBEDDING_API_KEY").ok()
}

pub fn embedding_base_url() -> String {
    std::env::var("EMBEDDING_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_string())
}

pub fn embedding_model() -> String {
    std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string())
}

pub fn current_key_id() -> String {
    std::env::var("ENCRYPTION_KEY_ID").unwrap_or_else(|_| DEFAULT_KEY_ID.to_string())
}

/// Master secret for a given key id, or `None` when nothing is configured
/// for it. `key-v1` payloads predate dedicated encryption keys and decrypt
/// with the service-role key.
pub fn master_secret(key_id: &str) -> Option<SecretString> {
    if key_id == LEGACY_KEY_ID {
        return secret("SERVICE_ROLE_KEY").ok();
    }
    if key_id == current_key_id() {
        return secret("ENCRYPTION_MASTER_KEY").ok();
    }
    None
}

pub fn scheduler_secret() -> Result<SecretString, ConfigError> {
    secret("SCHEDULER_SECRET")
}

pub fn provisioning_secret() -> Result<SecretString, ConfigError> {
    secret("PROVISIONING_SECRET")
}

pub fn allowed_origin() -> String {
    std::env::var("ALLOWED_ORIGIN").unwrap_or_else(|_| "*".to_string())
}
