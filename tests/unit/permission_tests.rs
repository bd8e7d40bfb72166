//! Unit tests for the pending-permission model.

use acp_bridge::models::permission::{
    next_request_id, PendingPermission, PermissionDecision, PermissionOptionView,
    PermissionParamsView,
};
use tokio::sync::oneshot;

fn params(options: &[(&str, &str)]) -> PermissionParamsView {
    PermissionParamsView {
        tool_title: Some("write file".to_owned()),
        options: options
            .iter()
            .map(|(id, kind)| PermissionOptionView {
                option_id: (*id).to_owned(),
                name: (*id).to_owned(),
                kind: (*kind).to_owned(),
            })
            .collect(),
    }
}

#[test]
fn request_ids_are_process_wide_monotonic() {
    let first = next_request_id();
    let second = next_request_id();
    assert!(second > first);
}

#[test]
fn option_kind_families() {
    let view = params(&[
        ("a", "allow_once"),
        ("b", "allow_always"),
        ("c", "reject_once"),
        ("d", "reject_always"),
    ]);
    assert!(view.options[0].is_allow());
    assert!(view.options[1].is_allow());
    assert!(view.options[2].is_reject());
    assert!(view.options[3].is_reject());
    assert!(!view.options[0].is_reject());
}

#[tokio::test]
async fn resolve_delivers_the_decision_exactly_once() {
    let (tx, rx) = oneshot::channel();
    let pending = PendingPermission::new(params(&[("ok", "allow_once")]), tx);
    pending.resolve(PermissionDecision::Selected {
        option_id: "ok".to_owned(),
    });

    let decision = rx.await.expect("decision delivered");
    assert_eq!(
        decision,
        PermissionDecision::Selected {
            option_id: "ok".to_owned()
        }
    );
}

#[tokio::test]
async fn resolve_tolerates_a_dropped_receiver() {
    let (tx, rx) = oneshot::channel();
    let pending = PendingPermission::new(params(&[]), tx);
    drop(rx);
    // Must not panic.
    pending.resolve(PermissionDecision::Cancelled);
}

#[test]
fn view_snapshots_id_and_params() {
    let (tx, _rx) = oneshot::channel();
    let pending = PendingPermission::new(params(&[("ok", "allow_once")]), tx);
    let view = pending.view();
    assert_eq!(view.request_id, pending.request_id);
    assert_eq!(view.params.options.len(), 1);

    let json = serde_json::to_value(&view).expect("serialize");
    assert!(json.get("requestId").is_some(), "camelCase wire field");
    assert!(json.get("requestedAt").is_some());
}
