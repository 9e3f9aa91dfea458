use std::sync::OnceLock;

use regex::Regex;

use super::{Severity, Violation};

struct Detector {
    kind: &'static str,
    severity: Severity,
    pattern: &'static str,
    compiled: OnceLock<Regex>,
}

impl Detector {
    const fn new(kind: &'static str, severity: Severity, pattern: &'static str) -> Self {
        Self {
            kind,
            severity,
            pattern,
            compiled: OnceLock::new(),
        }
    }

    fn regex(&self) -> &Regex {
        self.compiled
            .get_or_init(|| Regex::new(self.pattern).expect("static regex compiles"))
    }
}

/// Known injection shapes. Patterns are case-insensitive; a single `Block`
/// hit on user input causes the executor to refuse outright.
fn detectors() -> &'static [Detector] {
    static DETECTORS: OnceLock<Vec<Detector>> = OnceLock::new();
    DETECTORS.get_or_init(|| {
        vec![
            Detector::new(
                "instruction_override",
                Severity::Block,
                r"(?i)ignore\s+(?:all\s+)?(?:previous|above|prior)\s+instructions",
            ),
            Detector::new(
                "instruction_override",
                Severity::Block,
                r"(?i)new\s+instructions\s*:",
            ),
            Detector::new(
                "role_hijack",
                Severity::Block,
                r"(?i)you\s+are\s+now\s+an?\s+",
            ),
            Detector::new(
                "delimiter_injection",
                Severity::Block,
                r"(?i)\[/?INST\]|<<\s*/?SYS\s*>>|</?system>",
            ),
            Detector::new(
                "prompt_extraction",
                Severity::Warn,
                r"(?i)(?:reveal|show|print|repeat|output)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+prompt|instructions|initial\s+prompt)",
            ),
        ]
    })
}

/// Scan text for prompt-injection shapes. Each detector contributes at
/// most one violation regardless of how often it matches.
pub fn detect_prompt_injection(input: &str) -> Vec<Violation> {
    let mut violations: Vec<Violation> = Vec::new();
    for detector in detectors() {
        if detector.regex().is_match(input)
            && !violations.iter().any(|v| v.kind == detector.kind)
        {
            violations.push(Violation {
                kind: detector.kind.to_string(),
                severity: detector.severity,
            });
        }
    }
    violations
}
