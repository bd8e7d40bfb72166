//! Pre-spawn validation: binary presence, credentials, endpoint reachability.
//!
//! `preflight` gates every `POST /agents`; it never spawns anything. All
//! failures surface verbatim as HTTP 400 messages. The same primitives
//! back the `/doctor` and diagnose reports.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::expand_tilde_path;
use crate::errors::{BridgeError, Result};
use crate::models::agent::AgentKind;
use crate::probe::probe_endpoint;

/// Environment variable that replaces the per-type binary check with an
/// explicit executable.
pub const AGENT_COMMAND_VAR: &str = "ACP_BRIDGE_AGENT_COMMAND";

/// Credential rule for a kind: any one of `vars` satisfies the check;
/// `label` names the variable quoted in failure messages.
#[derive(Debug, Clone, Copy)]
pub struct CredentialRule {
    /// Accepted environment variables, in preference order.
    pub vars: &'static [&'static str],
    /// Variable named in the failure message.
    pub label: &'static str,
}

/// Binaries that satisfy the presence check for a kind, in preference order.
#[must_use]
pub fn binary_candidates(kind: &AgentKind) -> Vec<String> {
    match kind {
        AgentKind::Codex => vec!["codex-acp".to_owned(), "codex".to_owned()],
        AgentKind::Claude => vec!["claude-agent-acp".to_owned()],
        AgentKind::Gemini => vec!["gemini".to_owned()],
        AgentKind::Opencode => vec!["opencode".to_owned()],
        AgentKind::Other(name) => vec![name.clone()],
    }
}

/// Launch candidates tried in order by the connection supervisor when no
/// explicit command override exists.
#[must_use]
pub fn launch_candidates(kind: &AgentKind) -> Vec<(String, Vec<String>)> {
    match kind {
        AgentKind::Codex => vec![
            ("codex-acp".to_owned(), vec![]),
            ("codex".to_owned(), vec!["mcp-server".to_owned()]),
        ],
        AgentKind::Claude => vec![("claude-agent-acp".to_owned(), vec![])],
        AgentKind::Gemini => vec![(
            "gemini".to_owned(),
            vec!["--experimental-acp".to_owned()],
        )],
        AgentKind::Opencode => vec![("opencode".to_owned(), vec!["acp".to_owned()])],
        AgentKind::Other(name) => vec![(name.clone(), vec![])],
    }
}

/// Installation hint included in binary-not-found messages.
#[must_use]
pub fn install_hint(kind: &AgentKind) -> &'static str {
    match kind {
        AgentKind::Codex => "Install with: npm install -g @openai/codex",
        AgentKind::Claude => "Install with: npm install -g @zed-industries/claude-agent-acp",
        AgentKind::Gemini => "Install with: npm install -g @google/gemini-cli",
        AgentKind::Opencode => "Install with: curl -fsSL https://opencode.ai/install | bash",
        AgentKind::Other(_) => "Install it or set ACP_BRIDGE_AGENT_COMMAND.",
    }
}

/// Credential requirement for a kind, when any.
#[must_use]
pub fn credential_rule(kind: &AgentKind) -> Option<CredentialRule> {
    match kind {
        AgentKind::Codex => Some(CredentialRule {
            vars: &["OPENAI_API_KEY"],
            label: "OPENAI_API_KEY",
        }),
        AgentKind::Claude => Some(CredentialRule {
            vars: &["ANTHROPIC_API_KEY", "ANTHROPIC_AUTH_TOKEN"],
            label: "ANTHROPIC_API_KEY",
        }),
        AgentKind::Gemini => Some(CredentialRule {
            vars: &["GEMINI_API_KEY"],
            label: "GEMINI_API_KEY",
        }),
        AgentKind::Opencode | AgentKind::Other(_) => None,
    }
}

/// Base URL probed for a kind: environment override first, then the
/// provider default. OpenCode and fall-through kinds have none.
#[must_use]
pub fn base_url(kind: &AgentKind, env: &HashMap<String, String>) -> Option<String> {
    let (var, default) = match kind {
        AgentKind::Codex => ("OPENAI_BASE_URL", "https://api.openai.com/v1"),
        AgentKind::Claude => ("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
        AgentKind::Gemini => (
            "GOOGLE_GEMINI_BASE_URL",
            "https://generativelanguage.googleapis.com",
        ),
        AgentKind::Opencode | AgentKind::Other(_) => return None,
    };
    Some(lookup_env(env, var).unwrap_or_else(|| default.to_owned()))
}

/// Resolve an executable: a path containing a separator is checked by
/// filesystem existence (after tilde expansion); a bare name goes through
/// the PATH lookup.
#[must_use]
pub fn resolve_binary(spec: &str) -> Option<PathBuf> {
    if spec.contains(std::path::MAIN_SEPARATOR) || spec.contains('/') {
        let path = expand_tilde_path(spec);
        path.exists().then_some(path)
    } else {
        which::which(spec).ok()
    }
}

/// Whether the binary check passes for a kind given the merged environment.
///
/// `ACP_BRIDGE_AGENT_COMMAND` replaces the candidate list with one exact
/// executable.
#[must_use]
pub fn binary_available(kind: &AgentKind, env: &HashMap<String, String>) -> bool {
    if let Some(command) = lookup_env(env, AGENT_COMMAND_VAR) {
        return resolve_binary(&command).is_some();
    }
    binary_candidates(kind)
        .iter()
        .any(|name| resolve_binary(name).is_some())
}

/// Whether the credential check passes. Kinds without a rule always pass.
#[must_use]
pub fn credential_present(kind: &AgentKind, env: &HashMap<String, String>) -> bool {
    credential_rule(kind).is_none_or(|rule| {
        rule.vars
            .iter()
            .any(|var| lookup_env(env, var).is_some_and(|v| !v.trim().is_empty()))
    })
}

/// Look up a variable in the override map first, then the process
/// environment.
#[must_use]
pub fn lookup_env(env: &HashMap<String, String>, var: &str) -> Option<String> {
    env.get(var)
        .cloned()
        .or_else(|| std::env::var(var).ok())
        .filter(|v| !v.is_empty())
}

/// Run the full pre-spawn gate for a kind.
///
/// Checks binary, credentials, and endpoint in order; the first failure
/// wins and its message is surfaced verbatim.
///
/// # Errors
///
/// Returns [`BridgeError::Preflight`] with the user-facing message of the
/// first failed check.
pub async fn preflight(kind: &AgentKind, env: &HashMap<String, String>) -> Result<()> {
    if !binary_available(kind, env) {
        let name = lookup_env(env, AGENT_COMMAND_VAR)
            .unwrap_or_else(|| binary_candidates(kind).remove(0));
        return Err(BridgeError::Preflight(format!(
            "{name} binary not found on PATH. {}",
            install_hint(kind)
        )));
    }

    if !credential_present(kind, env) {
        let rule = credential_rule(kind).map_or("API key", |r| r.label);
        return Err(BridgeError::Preflight(format!(
            "{rule} is not set. Set it in environment or config."
        )));
    }

    if let Some(url) = base_url(kind, env) {
        let outcome = probe_endpoint(&url).await;
        if !outcome.responded {
            let code = outcome.error.unwrap_or_else(|| "no_response".to_owned());
            return Err(BridgeError::Preflight(format!(
                "Proxy {url} is unreachable ({code}). Check the URL."
            )));
        }
    }

    Ok(())
}
