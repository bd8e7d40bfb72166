//! Prompt template substitution.
//!
//! Every `{{ <id>.result }}` occurrence is replaced with the named
//! sibling's result. Whitespace is tolerated inside the braces; ids match
//! `[A-Za-z0-9_-]+`. An id that names no sibling passes through
//! unchanged; a sibling that did not finish with a result renders as the
//! empty string.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static RESULT_REF: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Pattern is a compile-time literal.
    Regex::new(r"\{\{\s*([A-Za-z0-9_-]+)\.result\s*\}\}").unwrap()
});

/// Render a prompt template against sibling results.
///
/// `results` maps sibling subtask ids to their result text (`None` when
/// the sibling has no result yet, or finished without one).
#[must_use]
pub fn render_prompt(template: &str, results: &HashMap<String, Option<String>>) -> String {
    RESULT_REF
        .replace_all(template, |caps: &Captures<'_>| {
            let id = &caps[1];
            results.get(id).map_or_else(
                || caps[0].to_owned(),
                |result| result.clone().unwrap_or_default(),
            )
        })
        .into_owned()
}
