use std::sync::OnceLock;

use regex::Regex;

use super::{pii_kinds, redact_pii, Violation};

/// Inputs larger than this are truncated before they reach the model.
pub const MAX_TOOL_OUTPUT_BYTES: usize = 50 * 1024;

const TRUNCATION_MARKER: &str = "[TRUNCATED]";

fn internal_ip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:10\.\d{1,3}\.\d{1,3}\.\d{1,3}|172\.(?:1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3})\b",
        )
        .expect("static regex compiles")
    })
}

fn env_assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][A-Z0-9_]{2,}=[^\s'\x22]+").expect("static regex compiles")
    })
}

fn connection_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:postgres(?:ql)?|mysql|mongodb(?:\+srv)?|redis|amqp)://\S+")
            .expect("static regex compiles")
    })
}

fn leak_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:my\s+system\s+prompt|my\s+instructions\s+(?:are|say)|i\s+was\s+instructed\s+to|here\s+is\s+my\s+system\s+prompt)",
        )
        .expect("static regex compiles")
    })
}

/// Filtered text plus everything the filter noticed along the way.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub content: String,
    pub violations: Vec<Violation>,
}

/// Sanitize tool output before it re-enters the conversation.
///
/// Applies PII redaction, strips internal addresses, environment
/// assignments and connection strings, and truncates oversized output.
/// Violations are collected for auditing but never block: tool output is
/// data, not instructions.
pub fn filter_tool_output(output: &str) -> FilterOutcome {
    let mut violations: Vec<Violation> = pii_kinds(output)
        .into_iter()
        .map(Violation::warn)
        .collect();

    let mut content = redact_pii(output);

    if internal_ip_re().is_match(&content) {
        violations.push(Violation::warn("internal_ip"));
        content = internal_ip_re()
            .replace_all(&content, "[REDACTED_INTERNAL_IP]")
            .into_owned();
    }
    if env_assignment_re().is_match(&content) {
        violations.push(Violation::warn("env_assignment"));
        content = env_assignment_re()
            .replace_all(&content, "[REDACTED_ENV]")
            .into_owned();
    }
    if connection_string_re().is_match(&content) {
        violations.push(Violation::warn("connection_string"));
        content = connection_string_re()
            .replace_all(&content, "[REDACTED_CONNECTION_STRING]")
            .into_owned();
    }

    if content.len() > MAX_TOOL_OUTPUT_BYTES {
        let mut cut = MAX_TOOL_OUTPUT_BYTES;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str(TRUNCATION_MARKER);
        violations.push(Violation::warn("truncated"));
    }

    FilterOutcome {
        content,
        violations,
    }
}

/// Filter a final model response: PII redaction plus a non-blocking
/// warning when the text looks like it is reciting its own instructions.
pub fn filter_response(response: &str) -> FilterOutcome {
    let mut violations: Vec<Violation> = pii_kinds(response)
        .into_iter()
        .map(Violation::warn)
        .collect();

    if leak_re().is_match(response) {
        violations.push(Violation::warn("system_prompt_leak"));
    }

    FilterOutcome {
        content: redact_pii(response),
        violations,
    }
}

/// Wrap tool output in boundary markers so the model treats it as data.
pub fn wrap_tool_result(tool_name: &str, content: &str) -> String {
    format!("[TOOL_RESULT: {tool_name}]\n{content}\n[/TOOL_RESULT]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_output_redacts_internal_addresses() {
        let outcome = filter_tool_output("host 10.1.2.3 and 172.16.0.1 and 192.168.1.10 and 8.8.8.8");
        assert_eq!(
            outcome.content,
            "host [REDACTED_INTERNAL_IP] and [REDACTED_INTERNAL_IP] and [REDACTED_INTERNAL_IP] and 8.8.8.8"
        );
        assert!(outcome.violations.iter().any(|v| v.kind == "internal_ip"));
    }

    #[test]
    fn tool_output_redacts_env_and_connection_strings() {
        let outcome =
            filter_tool_output("DATABASE_URL=postgres://user:pw@db:5432/app and AWS_SECRET=xyz123");
        assert!(!outcome.content.contains("postgres://"));
        assert!(!outcome.content.contains("AWS_SECRET=xyz123"));
        let kinds: Vec<_> = outcome.violations.iter().map(|v| v.kind.as_str()).collect();
        assert!(kinds.contains(&"env_assignment"));
    }

    #[test]
    fn tool_output_truncates_at_cap() {
        let big = "x".repeat(MAX_TOOL_OUTPUT_BYTES + 100);
        let outcome = filter_tool_output(&big);
        assert!(outcome.content.ends_with(TRUNCATION_MARKER));
        assert!(outcome.content.len() <= MAX_TOOL_OUTPUT_BYTES + TRUNCATION_MARKER.len());
        assert!(outcome.violations.iter().any(|v| v.kind == "truncated"));
    }

    #[test]
    fn response_filter_warns_on_leaks_without_blocking() {
        let outcome = filter_response("Sure! My system prompt says I should be helpful.");
        assert!(outcome
            .violations
            .iter()
            .any(|v| v.kind == "system_prompt_leak"));
        assert!(!crate::safety::has_blocking(&outcome.violations));
    }

    #[test]
    fn response_filter_redacts_pii() {
        let outcome = filter_response("Contact them at ada@example.com");
        assert_eq!(outcome.content, "Contact them at [REDACTED_EMAIL]");
    }

    #[test]
    fn boundary_markers() {
        assert_eq!(
            wrap_tool_result("crm_search", "{\"rows\":[]}"),
            "[TOOL_RESULT: crm_search]\n{\"rows\":[]}\n[/TOOL_RESULT]"
        );
    }
}
