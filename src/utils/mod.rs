/// Canonical tool-name form: lowercase, spaces collapsed to underscores.
pub(crate) fn normalize_tool_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Truncate at a char boundary, at most `max` characters.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_normalize() {
        assert_eq!(normalize_tool_name("CRM Search"), "crm_search");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
