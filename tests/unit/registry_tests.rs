//! Unit tests for the agent record store and its shared state block.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use acp_bridge::agents::registry::{AgentEntry, AgentRegistry, AgentShared, STDERR_CAP};
use acp_bridge::models::agent::{AgentKind, AgentState};
use acp_bridge::models::permission::{
    PendingPermission, PermissionDecision, PermissionParamsView,
};

fn test_entry(name: &str) -> Arc<AgentEntry> {
    let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
    Arc::new(AgentEntry::new(
        name.to_owned(),
        AgentKind::Opencode,
        PathBuf::from("/tmp"),
        format!("session-{name}"),
        "1".to_owned(),
        Some(4242),
        HashMap::new(),
        Arc::new(Mutex::new(AgentShared::new())),
        cmd_tx,
    ))
}

fn pending(shared: &mut AgentShared) -> oneshot::Receiver<PermissionDecision> {
    let (tx, rx) = oneshot::channel();
    shared.pending_permissions.push_back(PendingPermission::new(
        PermissionParamsView {
            tool_title: None,
            options: vec![],
        },
        tx,
    ));
    rx
}

// ── Stderr ring ──────────────────────────────────────

#[test]
fn stderr_ring_trims_and_drops_empty_lines() {
    let mut shared = AgentShared::new();
    shared.push_stderr_line("  warning: something  ");
    shared.push_stderr_line("   ");
    shared.push_stderr_line("");

    assert_eq!(shared.stderr_lines.len(), 1);
    assert_eq!(shared.stderr_lines[0], "warning: something");
    assert_eq!(shared.last_error.as_deref(), Some("warning: something"));
}

#[test]
fn stderr_ring_caps_at_fifty_drop_oldest() {
    let mut shared = AgentShared::new();
    for n in 0..60 {
        shared.push_stderr_line(&format!("line-{n}"));
    }
    assert_eq!(shared.stderr_lines.len(), STDERR_CAP);
    assert_eq!(shared.stderr_lines.front().map(String::as_str), Some("line-10"));
    assert_eq!(shared.stderr_lines.back().map(String::as_str), Some("line-59"));
}

#[test]
fn stderr_tail_returns_most_recent_lines() {
    let mut shared = AgentShared::new();
    for n in 0..5 {
        shared.push_stderr_line(&format!("line-{n}"));
    }
    assert_eq!(shared.stderr_tail(2), vec!["line-3", "line-4"]);
    assert_eq!(shared.stderr_tail(10).len(), 5);
}

// ── Chunk fan-out ────────────────────────────────────

#[test]
fn chunks_accumulate_and_fan_out_in_order() {
    let mut shared = AgentShared::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = shared.subscribe(tx);

    shared.append_chunk("hello ");
    shared.append_chunk("world");

    assert_eq!(shared.current_text, "hello world");
    assert_eq!(shared.last_text, "hello world");
    assert_eq!(rx.try_recv().ok().as_deref(), Some("hello "));
    assert_eq!(rx.try_recv().ok().as_deref(), Some("world"));

    shared.unsubscribe(id);
    shared.append_chunk("!");
    assert!(rx.try_recv().is_err(), "unsubscribed receivers get nothing");
}

#[test]
fn closed_subscribers_are_pruned() {
    let mut shared = AgentShared::new();
    let (tx, rx) = mpsc::unbounded_channel();
    shared.subscribe(tx);
    drop(rx);
    // Must not panic and must not retain the dead subscriber.
    shared.append_chunk("x");
    shared.append_chunk("y");
}

// ── Exit handling ────────────────────────────────────

#[tokio::test]
async fn mark_exited_cancels_pendings_and_stops() {
    let mut shared = AgentShared::new();
    shared.state = AgentState::Working;
    let rx = pending(&mut shared);

    shared.mark_exited(Some("exit code=1 signal=none".to_owned()));

    assert_eq!(shared.state, AgentState::Stopped);
    assert!(!shared.process_alive);
    assert_eq!(shared.last_error.as_deref(), Some("exit code=1 signal=none"));
    assert!(shared.pending_permissions.is_empty());
    assert!(matches!(rx.await, Ok(PermissionDecision::Cancelled)));
}

#[test]
fn mark_exited_preserves_an_earlier_error() {
    let mut shared = AgentShared::new();
    shared.state = AgentState::Error;
    shared.last_error = Some("Rate limited. Check proxy quota.".to_owned());

    shared.mark_exited(Some("exit code=0 signal=none".to_owned()));

    assert_eq!(shared.state, AgentState::Error, "error state is sticky");
    assert_eq!(
        shared.last_error.as_deref(),
        Some("Rate limited. Check proxy quota.")
    );
}

#[test]
fn cancel_pending_permissions_is_idempotent() {
    let mut shared = AgentShared::new();
    let _rx = pending(&mut shared);
    assert_eq!(shared.cancel_pending_permissions(), 1);
    assert_eq!(shared.cancel_pending_permissions(), 0);
}

// ── Registry ─────────────────────────────────────────

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let registry = AgentRegistry::new();
    registry.insert(test_entry("worker")).await.expect("first insert");

    let err = registry
        .insert(test_entry("worker"))
        .await
        .expect_err("duplicate must fail");
    assert_eq!(err.to_string(), "agent 'worker' already exists");
    assert_eq!(registry.count().await, 1);
}

#[tokio::test]
async fn remove_and_require_round_trip() {
    let registry = AgentRegistry::new();
    registry.insert(test_entry("a")).await.expect("insert");

    assert!(registry.require("a").await.is_ok());
    assert!(registry.remove("a").await.is_some());
    assert!(registry.remove("a").await.is_none());

    let err = registry.require("a").await.expect_err("gone");
    assert_eq!(err.to_string(), "agent 'a' not found");
}

#[tokio::test]
async fn list_is_sorted_by_name() {
    let registry = AgentRegistry::new();
    for name in ["zeta", "alpha", "mid"] {
        registry.insert(test_entry(name)).await.expect("insert");
    }
    let names: Vec<String> = registry
        .list()
        .await
        .into_iter()
        .map(|entry| entry.name.clone())
        .collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn status_snapshot_reflects_shared_state() {
    let entry = test_entry("snap");
    {
        let mut shared = entry.shared.lock().await;
        shared.state = AgentState::Idle;
        shared.last_text = "done".to_owned();
        shared.stop_reason = Some("end_turn".to_owned());
    }

    let status = entry.status().await;
    assert_eq!(status.name, "snap");
    assert_eq!(status.state, AgentState::Idle);
    assert_eq!(status.session_id, "session-snap");
    assert_eq!(status.stop_reason.as_deref(), Some("end_turn"));

    let json = serde_json::to_value(&status).expect("serialize");
    assert!(json.get("sessionId").is_some(), "camelCase wire fields");
    assert!(json.get("stopReason").is_some());
    assert!(json.get("pendingPermissions").is_some());
    assert_eq!(json.get("type").and_then(|v| v.as_str()), Some("opencode"));
}
