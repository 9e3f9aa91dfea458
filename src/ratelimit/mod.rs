mod durable;
pub use durable::*;

mod fixed_window;
pub use fixed_window::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one admission check against a fixed window.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    pub fn allowed(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after_secs: None,
        }
    }

    pub fn blocked(limit: u32, reset_at: DateTime<Utc>, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Standard rate-limit response headers, plus `Retry-After` when blocked.
pub fn headers_for(decision: &RateLimitDecision) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("X-RateLimit-Limit", decision.limit.to_string()),
        ("X-RateLimit-Remaining", decision.remaining.to_string()),
        ("X-RateLimit-Reset", decision.reset_at.timestamp().to_string()),
    ];
    if let Some(retry_after) = decision.retry_after_secs {
        headers.push(("Retry-After", retry_after.to_string()));
    }
    headers
}

/// Loopback callers (health checks, local tooling) bypass rate limiting.
pub fn is_loopback_key(key: &str) -> bool {
    matches!(key, "127.0.0.1" | "::1" | "localhost")
        || key.starts_with("127.0.0.1:")
        || key.starts_with("[::1]:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_include_retry_after_only_when_blocked() {
        let ok = RateLimitDecision::allowed(10, 9, Utc::now());
        assert_eq!(headers_for(&ok).len(), 3);

        let blocked = RateLimitDecision::blocked(10, Utc::now(), 42);
        let headers = headers_for(&blocked);
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], ("Retry-After", "42".to_string()));
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_key("127.0.0.1"));
        assert!(is_loopback_key("::1"));
        assert!(is_loopback_key("localhost"));
        assert!(!is_loopback_key("10.0.0.1"));
    }
}
