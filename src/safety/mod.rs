//! Content safety: pure filter functions plus the destructive-action gate.
//!
//! Everything in this module is synchronous and side-effect free so it can
//! sit directly on the request path.

mod destructive;
pub use destructive::*;

mod filters;
pub use filters::*;

mod injection;
pub use injection::*;

mod pii;
pub use pii::*;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Block,
}

/// One detected safety issue. `kind` is a stable machine-readable tag
/// (`instruction_override`, `pii_email`, …).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Violation {
    pub kind: String,
    pub severity: Severity,
}

impl Violation {
    pub fn warn(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity: Severity::Warn,
        }
    }

    pub fn block(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity: Severity::Block,
        }
    }
}

pub fn has_blocking(violations: &[Violation]) -> bool {
    violations.iter().any(|v| v.severity == Severity::Block)
}
