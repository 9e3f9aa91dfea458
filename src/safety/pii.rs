use std::sync::OnceLock;

use regex::Regex;

fn pattern(slot: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    slot.get_or_init(|| Regex::new(source).expect("static regex compiles"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
}

fn api_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"\b(?:sk-|pk_|key-|token_)[A-Za-z0-9_-]{16,}")
}

fn card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 13 to 19 digits, optionally separated by spaces or dashes.
    pattern(&RE, r"\b\d(?:[ -]?\d){12,18}\b")
}

fn ssn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"\b\d{3}-\d{2}-\d{4}\b|\b\d{9}\b")
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(
        &RE,
        r"(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b",
    )
}

/// Rewrite recognized PII patterns with fixed labels.
///
/// Order matters: longer, more specific patterns run before the ones they
/// would otherwise collide with (cards before SSNs before phone numbers).
pub fn redact_pii(input: &str) -> String {
    let out = email_re().replace_all(input, "[REDACTED_EMAIL]");
    let out = api_key_re().replace_all(&out, "[REDACTED_API_KEY]");
    let out = card_re().replace_all(&out, "[REDACTED_CARD]");
    let out = ssn_re().replace_all(&out, "[REDACTED_SSN]");
    let out = phone_re().replace_all(&out, "[REDACTED_PHONE]");
    out.into_owned()
}

/// Which PII categories appear in the input, as violation kinds.
pub fn pii_kinds(input: &str) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    if email_re().is_match(input) {
        kinds.push("pii_email");
    }
    if api_key_re().is_match(input) {
        kinds.push("pii_api_key");
    }
    if card_re().is_match(input) {
        kinds.push("pii_card");
    }
    if ssn_re().is_match(input) {
        kinds.push("pii_ssn");
    }
    if phone_re().is_match(input) {
        kinds.push("pii_phone");
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_emails() {
        let out = redact_pii("mail root@example.com the report");
        assert_eq!(out, "mail [REDACTED_EMAIL] the report");
    }

    #[test]
    fn redacts_api_key_shaped_tokens() {
        for token in [
            "sk-abcdefghijklmnop1234",
            "pk_live_abcdefghijklmnop",
            "key-ABCDEFGHIJKLMNOPQR",
            "token_abcdefghijklmnopqr",
        ] {
            let out = redact_pii(&format!("use {token} here"));
            assert!(out.contains("[REDACTED_API_KEY]"), "{token} survived: {out}");
            assert!(!out.contains(token));
        }
    }

    #[test]
    fn redacts_card_numbers() {
        let out = redact_pii("card 4111 1111 1111 1111 exp 12/28");
        assert!(out.contains("[REDACTED_CARD]"));
        assert!(!out.contains("4111"));
    }

    #[test]
    fn redacts_ssns() {
        assert!(redact_pii("ssn 123-45-6789").contains("[REDACTED_SSN]"));
        assert!(redact_pii("ssn 123456789").contains("[REDACTED_SSN]"));
    }

    #[test]
    fn redacts_phone_numbers() {
        for phone in ["(415) 555-1234", "415-555-1234", "+1 415 555 1234"] {
            let out = redact_pii(&format!("call {phone} today"));
            assert!(out.contains("[REDACTED_PHONE]"), "{phone} survived: {out}");
        }
    }

    #[test]
    fn plain_text_passes_through() {
        let input = "find contacts named Ada";
        assert_eq!(redact_pii(input), input);
        assert!(pii_kinds(input).is_empty());
    }

    #[test]
    fn kinds_reflect_categories_present() {
        let kinds = pii_kinds("reach ada@example.com or 415-555-1234");
        assert!(kinds.contains(&"pii_email"));
        assert!(kinds.contains(&"pii_phone"));
    }
}
