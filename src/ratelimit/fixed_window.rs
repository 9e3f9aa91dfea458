use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use super::{is_loopback_key, RateLimitDecision};

struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// In-process fixed-window limiter. State lives in a plain map and is lost
/// on restart; the durable variant covers deployments where that matters.
pub struct FixedWindowLimiter {
    window: Duration,
    buckets: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::milliseconds(window_ms as i64),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// One-minute windows, the shape used for per-agent limits.
    pub fn per_minute() -> Self {
        Self::new(60_000)
    }

    pub fn check(&self, key: &str, max: u32) -> RateLimitDecision {
        let now = Utc::now();

        if is_loopback_key(key) {
            return RateLimitDecision::allowed(max, max, now + self.window);
        }

        let mut buckets = self.buckets.lock().expect("rate limit mutex poisoned");
        let window = buckets.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        // First request of a new window resets the count to 1.
        if now - window.started_at >= self.window {
            window.started_at = now;
            window.count = 0;
        }

        let reset_at = window.started_at + self.window;

        if window.count >= max {
            let retry_after = (reset_at - now).num_seconds().max(0) as u64;
            return RateLimitDecision::blocked(max, reset_at, retry_after.max(1));
        }

        window.count += 1;
        RateLimitDecision::allowed(max, max - window.count, reset_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_within_a_window() {
        let limiter = FixedWindowLimiter::per_minute();

        for expected_remaining in [1, 0] {
            let decision = limiter.check("agent:a", 2);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let third = limiter.check("agent:a", 2);
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert!(third.retry_after_secs.unwrap() >= 1);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = FixedWindowLimiter::per_minute();
        assert!(!limiter.check("a", 1).allowed || limiter.check("b", 1).allowed);
        assert!(limiter.check("c", 1).allowed);
    }

    #[test]
    fn window_reset_starts_count_at_one() {
        let limiter = FixedWindowLimiter::new(1);
        assert!(limiter.check("k", 1).allowed);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let decision = limiter.check("k", 1);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn loopback_is_always_allowed() {
        let limiter = FixedWindowLimiter::per_minute();
        for _ in 0..10 {
            assert!(limiter.check("127.0.0.1", 1).allowed);
        }
    }
}
