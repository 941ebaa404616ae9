//! Value normalization shared across the engine.
//!
//! Stored values keep their original spelling; these keys are only used for
//! equality checks, uniqueness and matching.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("valid email regex"));
static NON_ALNUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid non-alnum regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Trims a value and maps blank input to `None`.
pub fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Lowercased, trimmed email used for uniqueness checks.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Returns whether `value` has the shape of a deliverable email address.
pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value.trim())
}

/// Source system identifiers are compared case-insensitively.
pub fn normalize_source_system(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Digits-only phone key. Formatting characters are dropped.
pub fn phone_digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Normalizes one tag or source label: trimmed, lowercased, inner
/// whitespace collapsed.
pub fn normalize_tag(value: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(value.trim(), " ").to_lowercase();
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Collapses a free-text address fragment into a comparison key.
pub fn address_fragment_key(value: &str) -> String {
    NON_ALNUM_RE
        .replace_all(&value.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// First five characters of a postal code, US ZIP+4 aware.
pub fn postal_prefix(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(5)
        .collect::<String>()
        .to_lowercase()
}
