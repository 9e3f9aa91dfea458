use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Monotonic deadline carried through every suspension point.
///
/// Components consult it instead of racing promises: each external call
/// bounds itself by `remaining()` and returns a typed timeout outcome when
/// the budget is gone.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn in_millis(ms: u64) -> Self {
        Self {
            at: Instant::now() + Duration::from_millis(ms),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// A sub-deadline no later than this one.
    pub fn clamped(&self, ms: u64) -> Self {
        let candidate = Instant::now() + Duration::from_millis(ms);
        Self {
            at: candidate.min(self.at),
        }
    }
}

/// Immutable per-request context: who is acting, under which correlation
/// id, and how much wall clock is left.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub agent_id: Option<Uuid>,
    pub deadline: Deadline,
}

impl RequestContext {
    /// Externally-initiated requests get the 25-second ceiling; internal
    /// components derive tighter sub-deadlines from it.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            agent_id: None,
            deadline: Deadline::in_millis(25_000),
        }
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}
