//! Identity normalization.
//!
//! RULE: every equality check between operator and lead identifiers
//! goes through this module. Identifiers arrive from different
//! producers with inconsistent casing and punctuation; comparing raw
//! values silently splits one operator's queue into several.

/// Canonical comparison key: trimmed, lower-cased, stripped of every
/// character outside `[a-z0-9]`. An empty key means "unassigned" and
/// never matches anything, including another empty key.
pub fn canonical_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Canonical key of an optional identifier. None canonicalizes to the
/// empty key, same as a blank string.
pub fn canonical_opt(raw: Option<&str>) -> String {
    raw.map(canonical_key).unwrap_or_default()
}

/// Two identifiers name the same operator iff their canonical keys are
/// equal and non-empty.
pub fn same_identity(a: &str, b: &str) -> bool {
    let ka = canonical_key(a);
    !ka.is_empty() && ka == canonical_key(b)
}

/// Phone normalization: digits only. Applied before storage and before
/// dial-prefix concatenation.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casing_and_punctuation_collapse_to_one_key() {
        assert_eq!(canonical_key("  ABC-123 "), "abc123");
        assert_eq!(canonical_key("abc123"), "abc123");
        assert_eq!(canonical_key("Abc_123"), "abc123");
        assert!(same_identity("  ABC-123 ", "Abc_123"));
    }

    #[test]
    fn empty_keys_never_match() {
        assert!(!same_identity("", ""));
        assert!(!same_identity("  ", "--"));
        assert!(!same_identity("", "op1"));
        assert_eq!(canonical_opt(None), "");
        assert_eq!(canonical_opt(Some(" -- ")), "");
    }

    #[test]
    fn non_ascii_characters_are_stripped() {
        assert_eq!(canonical_key("opérateur-1"), "oprateur1");
    }

    #[test]
    fn digits_only_strips_formatting() {
        assert_eq!(digits_only("+1 (555) 010-2233"), "15550102233");
        assert_eq!(digits_only("no digits"), "");
    }
}
