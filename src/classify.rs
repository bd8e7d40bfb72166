//! Error classification for agent-returned failures.
//!
//! Maps a raw error string onto a small set of stable, user-facing
//! messages. Invoked only on the ask executor's error path — successful
//! prompt completions are never classified, so a legitimate reply that
//! happens to contain `"503"` is left alone.

use std::sync::LazyLock;

use regex::Regex;

/// Matches `401` or `403` as a standalone token (not part of a longer number).
static AUTH_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Pattern is a compile-time literal.
    Regex::new(r"\b(401|403)\b").unwrap()
});

/// Classify a raw agent error into a stable user-facing message.
///
/// Rules are applied in order on the stringified message; the first match
/// wins. An unrecognized error passes through unchanged.
#[must_use]
pub fn classify(raw: &str) -> String {
    if AUTH_STATUS.is_match(raw) {
        return "API key invalid or expired. Check your key.".to_owned();
    }
    if raw.contains("429") {
        return "Rate limited. Check proxy quota.".to_owned();
    }
    if raw.contains("503") {
        return "Service unavailable. Check proxy status.".to_owned();
    }
    if raw.contains("ECONNREFUSED") {
        return "Connection refused. Check base URL.".to_owned();
    }
    if raw.contains("ENOTFOUND") {
        return "DNS resolution failed. Check network.".to_owned();
    }
    raw.to_owned()
}
