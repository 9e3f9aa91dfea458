use std::sync::Arc;

use crate::storage::Storage;

use super::{is_loopback_key, FixedWindowLimiter, RateLimitDecision};

/// Storage-backed fixed-window limiter.
///
/// The atomic check-and-increment lives in storage so multiple processes
/// share one bucket per `(key, window)`. A storage outage must not open
/// the gate unbounded, so failures fall back to the in-process limiter.
pub struct DurableRateLimiter {
    storage: Arc<dyn Storage>,
    fallback: FixedWindowLimiter,
    window_ms: u64,
}

impl DurableRateLimiter {
    pub fn new(storage: Arc<dyn Storage>, window_ms: u64) -> Self {
        Self {
            storage,
            fallback: FixedWindowLimiter::new(window_ms),
            window_ms,
        }
    }

    pub async fn check(&self, key: &str, max: u32) -> RateLimitDecision {
        if is_loopback_key(key) {
            return self.fallback.check(key, max);
        }

        match self.storage.check_rate_limit(key, self.window_ms, max).await {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("Durable rate limit check failed for {key}, using in-process fallback: {e}");
                self.fallback.check(key, max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    #[tokio::test]
    async fn delegates_to_storage_buckets() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = DurableRateLimiter::new(storage, 60_000);

        assert!(limiter.check("agent:a", 2).await.allowed);
        assert!(limiter.check("agent:a", 2).await.allowed);
        let blocked = limiter.check("agent:a", 2).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
    }

    #[tokio::test]
    async fn loopback_bypasses_storage() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = DurableRateLimiter::new(storage, 60_000);
        for _ in 0..5 {
            assert!(limiter.check("127.0.0.1", 1).await.allowed);
        }
    }
}
