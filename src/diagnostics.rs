//! Diagnostics composer: `/doctor` and per-agent deep health reports.
//!
//! Both reuse the preflight primitives without ever spawning anything.
//! Endpoint interpretation differs from preflight here: a response with
//! status 500+ counts as reachable-but-unhealthy.

use std::collections::HashMap;

use crate::agents::registry::AgentEntry;
use crate::models::agent::{
    AgentKind, ApiKeyFormat, DiagnoseChecks, DiagnoseReport, DoctorEntry, DoctorStatus,
};
use crate::preflight::{
    base_url, binary_available, binary_candidates, credential_present, credential_rule,
    install_hint, lookup_env,
};
use crate::probe::probe_endpoint;

/// Run the binary/credential/endpoint checks for every known agent kind.
pub async fn doctor() -> Vec<DoctorEntry> {
    let env = HashMap::new();
    let mut results = Vec::new();
    for kind in AgentKind::known() {
        results.push(doctor_entry(&kind, &env).await);
    }
    results
}

async fn doctor_entry(kind: &AgentKind, env: &HashMap<String, String>) -> DoctorEntry {
    let binary = binary_available(kind, env);
    let api_key = credential_present(kind, env);

    let mut message: Option<String> = None;
    if !binary {
        let name = binary_candidates(kind).remove(0);
        message = Some(format!(
            "{name} binary not found on PATH. {}",
            install_hint(kind)
        ));
    } else if !api_key {
        let label = credential_rule(kind).map_or("API key", |rule| rule.label);
        message = Some(format!("{label} is not set. Set it in environment or config."));
    }

    // Kinds without a base URL skip the endpoint check entirely.
    let mut endpoint = true;
    let mut endpoint_warning = false;
    if let Some(url) = base_url(kind, env) {
        let outcome = probe_endpoint(&url).await;
        endpoint = outcome.healthy();
        if !outcome.responded {
            endpoint_warning = true;
            if message.is_none() {
                let code = outcome.error.unwrap_or_else(|| "no_response".to_owned());
                message = Some(format!("Proxy {url} is unreachable ({code}). Check the URL."));
            }
        } else if !outcome.healthy() {
            endpoint_warning = true;
            if message.is_none() {
                let status = outcome.status.unwrap_or(0);
                message = Some(format!("Proxy {url} returned status {status}."));
            }
        }
    }

    let status = if !binary || !api_key {
        DoctorStatus::Error
    } else if endpoint_warning {
        DoctorStatus::Warning
    } else {
        DoctorStatus::Ok
    };

    DoctorEntry {
        kind: kind.clone(),
        status,
        binary,
        api_key,
        endpoint,
        message,
    }
}

/// Build the deep health report for a live agent.
pub async fn diagnose(entry: &AgentEntry) -> DiagnoseReport {
    let env = &entry.env;
    let api_key_set = credential_present(&entry.kind, env);
    let api_key_format = key_format(&entry.kind, env);

    let (endpoint_reachable, endpoint_latency_ms) = match base_url(&entry.kind, env) {
        Some(url) => {
            let outcome = probe_endpoint(&url).await;
            (outcome.healthy(), outcome.latency_ms)
        }
        None => (true, None),
    };

    let shared = entry.shared.lock().await;
    DiagnoseReport {
        agent: entry.name.clone(),
        process_alive: shared.process_alive,
        state: shared.state,
        recent_stderr: shared.stderr_tail(crate::agents::registry::STDERR_CAP),
        last_error: shared.last_error.clone(),
        checks: DiagnoseChecks {
            api_key_set,
            api_key_format,
            endpoint_reachable,
            endpoint_latency_ms,
            protocol_version: entry.protocol_version.clone(),
        },
    }
}

/// Judge the configured key's shape by its provider prefix.
fn key_format(kind: &AgentKind, env: &HashMap<String, String>) -> ApiKeyFormat {
    let judge = |key: Option<String>, prefixes: &[&str]| match key {
        None => ApiKeyFormat::Missing,
        Some(key) if prefixes.iter().any(|prefix| key.starts_with(prefix)) => ApiKeyFormat::Valid,
        Some(_) => ApiKeyFormat::Invalid,
    };

    match kind {
        AgentKind::Codex => judge(lookup_env(env, "OPENAI_API_KEY"), &["sk-"]),
        AgentKind::Claude => match lookup_env(env, "ANTHROPIC_API_KEY") {
            Some(key) => judge(Some(key), &["cr_", "sk-ant-"]),
            // An auth token satisfies the credential check but its shape
            // is not ours to judge.
            None if lookup_env(env, "ANTHROPIC_AUTH_TOKEN").is_some() => ApiKeyFormat::Unknown,
            None => ApiKeyFormat::Missing,
        },
        AgentKind::Gemini => judge(lookup_env(env, "GEMINI_API_KEY"), &["AIza"]),
        AgentKind::Opencode | AgentKind::Other(_) => ApiKeyFormat::NotRequired,
    }
}
