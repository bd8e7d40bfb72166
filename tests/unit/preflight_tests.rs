//! Unit tests for the preflight primitives.
//!
//! Checks that mutate `PATH` or credential variables are serialized.

use std::collections::HashMap;

use serial_test::serial;

use acp_bridge::models::agent::AgentKind;
use acp_bridge::preflight::{
    base_url, binary_candidates, credential_present, credential_rule, launch_candidates,
    preflight, resolve_binary,
};

fn env(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

// ── Candidate tables ─────────────────────────────────

#[test]
fn codex_accepts_either_binary() {
    assert_eq!(binary_candidates(&AgentKind::Codex), vec!["codex-acp", "codex"]);
}

#[test]
fn fallthrough_kind_requires_its_own_name() {
    let kind = AgentKind::Other("aider".to_owned());
    assert_eq!(binary_candidates(&kind), vec!["aider"]);
    assert_eq!(launch_candidates(&kind), vec![("aider".to_owned(), vec![])]);
}

#[test]
fn launch_candidates_match_the_adapter_matrix() {
    assert_eq!(
        launch_candidates(&AgentKind::Codex),
        vec![
            ("codex-acp".to_owned(), vec![]),
            ("codex".to_owned(), vec!["mcp-server".to_owned()]),
        ]
    );
    assert_eq!(
        launch_candidates(&AgentKind::Gemini),
        vec![("gemini".to_owned(), vec!["--experimental-acp".to_owned()])]
    );
    assert_eq!(
        launch_candidates(&AgentKind::Opencode),
        vec![("opencode".to_owned(), vec!["acp".to_owned()])]
    );
}

// ── Binary resolution ────────────────────────────────

#[test]
fn path_spec_with_separator_checks_the_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");
    let binary = dir.path().join("fake-agent");
    std::fs::write(&binary, b"#!/bin/sh\n").expect("write");

    let spec = binary.to_string_lossy().into_owned();
    assert_eq!(resolve_binary(&spec), Some(binary));
    assert!(resolve_binary("/nonexistent/dir/fake-agent").is_none());
}

#[test]
fn bare_name_goes_through_path_lookup() {
    // `sh` exists on every supported platform's PATH.
    assert!(resolve_binary("sh").is_some());
    assert!(resolve_binary("definitely-not-a-real-binary-42").is_none());
}

// ── Credentials ──────────────────────────────────────

#[test]
#[serial]
fn codex_requires_openai_key() {
    std::env::remove_var("OPENAI_API_KEY");
    assert!(!credential_present(&AgentKind::Codex, &HashMap::new()));
    assert!(credential_present(
        &AgentKind::Codex,
        &env(&[("OPENAI_API_KEY", "sk-x")])
    ));
    // Whitespace-only does not count.
    assert!(!credential_present(
        &AgentKind::Codex,
        &env(&[("OPENAI_API_KEY", "   ")])
    ));
}

#[test]
#[serial]
fn claude_accepts_either_credential() {
    std::env::remove_var("ANTHROPIC_API_KEY");
    std::env::remove_var("ANTHROPIC_AUTH_TOKEN");
    assert!(!credential_present(&AgentKind::Claude, &HashMap::new()));
    assert!(credential_present(
        &AgentKind::Claude,
        &env(&[("ANTHROPIC_AUTH_TOKEN", "token")])
    ));
    assert!(credential_present(
        &AgentKind::Claude,
        &env(&[("ANTHROPIC_API_KEY", "sk-ant-x")])
    ));
}

#[test]
fn opencode_needs_no_credentials() {
    assert!(credential_rule(&AgentKind::Opencode).is_none());
    assert!(credential_present(&AgentKind::Opencode, &HashMap::new()));
}

// ── Base URLs ────────────────────────────────────────

#[test]
#[serial]
fn base_urls_use_override_then_default() {
    std::env::remove_var("OPENAI_BASE_URL");
    assert_eq!(
        base_url(&AgentKind::Codex, &HashMap::new()).as_deref(),
        Some("https://api.openai.com/v1")
    );
    assert_eq!(
        base_url(&AgentKind::Codex, &env(&[("OPENAI_BASE_URL", "http://127.0.0.1:8045/v1")]))
            .as_deref(),
        Some("http://127.0.0.1:8045/v1")
    );
    assert_eq!(base_url(&AgentKind::Opencode, &HashMap::new()), None);
}

// ── The gate ─────────────────────────────────────────

#[tokio::test]
#[serial]
async fn missing_binary_fails_with_install_hint() {
    std::env::remove_var("ACP_BRIDGE_AGENT_COMMAND");
    let kind = AgentKind::Other("definitely-not-a-real-binary-42".to_owned());
    let err = preflight(&kind, &HashMap::new())
        .await
        .expect_err("binary check must fail");
    let message = err.to_string();
    assert!(
        message.starts_with("definitely-not-a-real-binary-42 binary not found on PATH."),
        "message: {message}"
    );
}

#[tokio::test]
#[serial]
async fn missing_claude_credential_fails_with_exact_message() {
    // Put a fake claude-agent-acp on PATH so the credential check is
    // reached, then clear both accepted variables.
    let dir = tempfile::tempdir().expect("tempdir");
    let binary = dir.path().join("claude-agent-acp");
    std::fs::write(&binary, b"#!/bin/sh\nexit 0\n").expect("write");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
    }

    let old_path = std::env::var_os("PATH");
    let joined = std::env::join_paths(
        std::iter::once(dir.path().to_path_buf())
            .chain(old_path.as_ref().map(|p| std::env::split_paths(p).collect::<Vec<_>>()).unwrap_or_default()),
    )
    .expect("join paths");
    std::env::set_var("PATH", &joined);
    std::env::remove_var("ANTHROPIC_API_KEY");
    std::env::remove_var("ANTHROPIC_AUTH_TOKEN");
    std::env::remove_var("ACP_BRIDGE_AGENT_COMMAND");

    let err = preflight(&AgentKind::Claude, &HashMap::new())
        .await
        .expect_err("credential check must fail");
    assert_eq!(
        err.to_string(),
        "ANTHROPIC_API_KEY is not set. Set it in environment or config."
    );

    if let Some(path) = old_path {
        std::env::set_var("PATH", path);
    }
}

#[tokio::test]
#[serial]
async fn unreachable_endpoint_fails_with_proxy_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let binary = dir.path().join("probe-agent");
    std::fs::write(&binary, b"#!/bin/sh\nexit 0\n").expect("write");

    std::env::set_var("ACP_BRIDGE_AGENT_COMMAND", binary.to_string_lossy().into_owned());
    // TEST-NET-1 is guaranteed non-routable; keep the wait short by
    // relying on the probe's own timeout.
    let overrides = env(&[
        ("GEMINI_API_KEY", "AIza-test"),
        ("GOOGLE_GEMINI_BASE_URL", "http://192.0.2.1:9"),
    ]);

    let err = preflight(&AgentKind::Gemini, &overrides)
        .await
        .expect_err("endpoint check must fail");
    let message = err.to_string();
    assert!(
        message.starts_with("Proxy http://192.0.2.1:9 is unreachable ("),
        "message: {message}"
    );
    assert!(message.ends_with("). Check the URL."), "message: {message}");

    std::env::remove_var("ACP_BRIDGE_AGENT_COMMAND");
}

#[tokio::test]
#[serial]
async fn explicit_agent_command_overrides_the_candidate_list() {
    std::env::remove_var("ACP_BRIDGE_AGENT_COMMAND");
    let overrides = env(&[("ACP_BRIDGE_AGENT_COMMAND", "/nonexistent/agent-bin")]);
    let err = preflight(&AgentKind::Opencode, &overrides)
        .await
        .expect_err("explicit command must be verified");
    assert!(err.to_string().contains("/nonexistent/agent-bin"));
}
