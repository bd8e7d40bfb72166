//! Serde round-trip and wire-shape tests for the domain models.

use acp_bridge::models::agent::{AgentKind, AgentState, CreateAgentRequest};
use acp_bridge::models::task::{CreateTaskRequest, SubtaskState, TaskState};

// ── AgentKind ────────────────────────────────────────

#[test]
fn agent_kind_parses_known_and_fallthrough() {
    assert_eq!(AgentKind::parse("codex"), AgentKind::Codex);
    assert_eq!(AgentKind::parse("claude"), AgentKind::Claude);
    assert_eq!(AgentKind::parse("gemini"), AgentKind::Gemini);
    assert_eq!(AgentKind::parse("opencode"), AgentKind::Opencode);
    assert_eq!(
        AgentKind::parse("aider"),
        AgentKind::Other("aider".to_owned())
    );
}

#[test]
fn agent_kind_serializes_as_plain_string() {
    let json = serde_json::to_string(&AgentKind::Codex).expect("serialize");
    assert_eq!(json, "\"codex\"");
    let back: AgentKind = serde_json::from_str("\"aider\"").expect("deserialize");
    assert_eq!(back, AgentKind::Other("aider".to_owned()));
}

#[test]
fn agent_kind_rejects_empty_string() {
    assert!(serde_json::from_str::<AgentKind>("\"\"").is_err());
}

// ── States ───────────────────────────────────────────

#[test]
fn agent_state_uses_snake_case_wire_values() {
    let values = [
        (AgentState::Starting, "\"starting\""),
        (AgentState::Idle, "\"idle\""),
        (AgentState::Working, "\"working\""),
        (AgentState::Stopped, "\"stopped\""),
        (AgentState::Error, "\"error\""),
    ];
    for (variant, expected) in values {
        let json = serde_json::to_string(&variant).expect("serialize");
        assert_eq!(json, expected, "AgentState::{variant:?}");
    }
}

#[test]
fn subtask_terminal_states() {
    assert!(!SubtaskState::Pending.is_terminal());
    assert!(!SubtaskState::Running.is_terminal());
    assert!(SubtaskState::Done.is_terminal());
    assert!(SubtaskState::Error.is_terminal());
    assert!(SubtaskState::Cancelled.is_terminal());
}

#[test]
fn task_terminal_states() {
    assert!(!TaskState::Running.is_terminal());
    assert!(TaskState::Done.is_terminal());
    assert!(TaskState::Error.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
}

// ── Request payloads ─────────────────────────────────

#[test]
fn create_agent_request_accepts_minimal_body() {
    let request: CreateAgentRequest =
        serde_json::from_str(r#"{ "name": "worker" }"#).expect("deserialize");
    assert_eq!(request.name, "worker");
    assert!(request.kind.is_none());
    assert!(request.cwd.is_none());
    assert!(request.env.is_empty());
}

#[test]
fn create_agent_request_reads_camel_case_fields() {
    let request: CreateAgentRequest = serde_json::from_str(
        r#"{
            "type": "claude",
            "name": "reviewer",
            "cwd": "/tmp",
            "command": "claude-agent-acp",
            "args": ["--verbose"],
            "env": { "ANTHROPIC_API_KEY": "sk-ant-x" }
        }"#,
    )
    .expect("deserialize");
    assert_eq!(request.kind, Some(AgentKind::Claude));
    assert_eq!(request.command.as_deref(), Some("claude-agent-acp"));
}

#[test]
fn create_task_request_reads_depends_on() {
    let request: CreateTaskRequest = serde_json::from_str(
        r#"{
            "name": "pipeline",
            "subtasks": [
                { "id": "scan", "agent": "a", "prompt": "scan" },
                { "agent": "a", "prompt": "fix: {{scan.result}}", "dependsOn": ["scan"] }
            ]
        }"#,
    )
    .expect("deserialize");
    assert_eq!(request.subtasks.len(), 2);
    assert_eq!(request.subtasks[1].depends_on, vec!["scan".to_owned()]);
    assert!(request.subtasks[1].id.is_none());
}
