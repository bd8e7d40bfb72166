//! Integration tests for the ask executor against stub agents.

use tokio::sync::{mpsc, oneshot};

use acp_bridge::agents::ask::ask;
use acp_bridge::agents::registry::AgentRegistry;
use acp_bridge::models::agent::{ActiveTaskRef, AgentState};
use acp_bridge::models::permission::{
    PendingPermission, PermissionDecision, PermissionParamsView,
};
use acp_bridge::BridgeError;

use super::test_helpers::{install_stub, StubBehavior};

const TIMEOUT_MS: u64 = 5_000;

#[tokio::test]
async fn ask_aggregates_the_reply_and_returns_to_idle() {
    let registry = AgentRegistry::new();
    let stub = install_stub(
        &registry,
        "worker",
        StubBehavior::Reply {
            text: "hello world".to_owned(),
            delay_ms: 0,
        },
    )
    .await;

    let outcome = ask(&registry, TIMEOUT_MS, "worker", "do it", None, None)
        .await
        .expect("ask succeeds");

    assert_eq!(outcome.name, "worker");
    assert_eq!(outcome.response, "hello world");
    assert_eq!(outcome.stop_reason.as_deref(), Some("end_turn"));
    assert_eq!(outcome.state, AgentState::Idle);

    let shared = stub.entry.shared.lock().await;
    assert_eq!(shared.state, AgentState::Idle);
    assert_eq!(shared.last_text, "hello world");
    assert_eq!(shared.stop_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn published_chunks_concatenate_to_the_response() {
    let registry = AgentRegistry::new();
    install_stub(
        &registry,
        "worker",
        StubBehavior::Reply {
            text: "streaming reply text".to_owned(),
            delay_ms: 0,
        },
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = ask(&registry, TIMEOUT_MS, "worker", "go", Some(tx), None)
        .await
        .expect("ask succeeds");

    let mut collected = String::new();
    while let Ok(chunk) = rx.try_recv() {
        collected.push_str(&chunk);
    }
    assert_eq!(collected, outcome.response);
    assert_eq!(collected, "streaming reply text");
}

#[tokio::test]
async fn concurrent_ask_observes_agent_busy() {
    let registry = AgentRegistry::new();
    install_stub(
        &registry,
        "worker",
        StubBehavior::Reply {
            text: "slow".to_owned(),
            delay_ms: 300,
        },
    )
    .await;

    let first = ask(&registry, TIMEOUT_MS, "worker", "one", None, None);
    let second = async {
        // Let the first ask claim the agent.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ask(&registry, TIMEOUT_MS, "worker", "two", None, None).await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok(), "first ask wins the claim");
    match second {
        Err(BridgeError::AgentBusy(message)) => {
            assert_eq!(message, "agent 'worker' already has a prompt in flight");
        }
        other => panic!("expected agent_busy, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_returns_the_agent_to_idle() {
    let registry = AgentRegistry::new();
    let stub = install_stub(&registry, "worker", StubBehavior::Hang).await;

    let err = ask(&registry, 100, "worker", "forever", None, None)
        .await
        .expect_err("must time out");
    match err {
        BridgeError::Timeout(message) => assert_eq!(message, "ask timeout after 100ms"),
        other => panic!("expected timeout, got {other:?}"),
    }

    let shared = stub.entry.shared.lock().await;
    assert_eq!(shared.state, AgentState::Idle, "child is not killed");
    assert_eq!(shared.stop_reason.as_deref(), Some("timeout"));
    assert_eq!(shared.last_error.as_deref(), Some("ask timeout after 100ms"));
}

#[tokio::test]
async fn timeout_cancels_permissions_parked_mid_prompt() {
    let registry = AgentRegistry::new();
    let stub = install_stub(&registry, "worker", StubBehavior::Hang).await;

    let registry_clone = registry.clone();
    let ask_handle = tokio::spawn(async move {
        ask(&registry_clone, 200, "worker", "forever", None, None).await
    });

    // Park a permission the way the ACP client does while the prompt is
    // in flight.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let (tx, rx) = oneshot::channel();
    {
        let mut shared = stub.entry.shared.lock().await;
        assert_eq!(shared.state, AgentState::Working, "ask has claimed the agent");
        shared.pending_permissions.push_back(PendingPermission::new(
            PermissionParamsView {
                tool_title: Some("write file".to_owned()),
                options: vec![],
            },
            tx,
        ));
    }

    let err = ask_handle
        .await
        .expect("join")
        .expect_err("must time out");
    assert!(matches!(err, BridgeError::Timeout(_)));

    // Idle agents never hold pending permissions.
    let shared = stub.entry.shared.lock().await;
    assert_eq!(shared.state, AgentState::Idle);
    assert!(shared.pending_permissions.is_empty());
    drop(shared);
    assert!(matches!(rx.await, Ok(PermissionDecision::Cancelled)));
}

#[tokio::test]
async fn prompt_failure_is_classified_and_marks_error() {
    let registry = AgentRegistry::new();
    let stub = install_stub(
        &registry,
        "worker",
        StubBehavior::Fail("upstream replied status 429 slow down".to_owned()),
    )
    .await;

    let err = ask(&registry, TIMEOUT_MS, "worker", "go", None, None)
        .await
        .expect_err("must fail");
    match err {
        BridgeError::Agent(message) => {
            assert_eq!(message, "Rate limited. Check proxy quota.");
        }
        other => panic!("expected agent error, got {other:?}"),
    }

    let shared = stub.entry.shared.lock().await;
    assert_eq!(shared.state, AgentState::Error);
    assert_eq!(
        shared.last_error.as_deref(),
        Some("Rate limited. Check proxy quota.")
    );
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let registry = AgentRegistry::new();
    let err = ask(&registry, TIMEOUT_MS, "ghost", "hi", None, None)
        .await
        .expect_err("unknown agent");
    assert!(matches!(err, BridgeError::NotFound(_)));
    assert_eq!(err.to_string(), "agent 'ghost' not found");
}

#[tokio::test]
async fn active_task_marker_is_set_during_and_cleared_after() {
    let registry = AgentRegistry::new();
    let stub = install_stub(
        &registry,
        "worker",
        StubBehavior::Reply {
            text: "ok".to_owned(),
            delay_ms: 200,
        },
    )
    .await;

    let marker = ActiveTaskRef {
        task_id: "task-1".to_owned(),
        subtask_id: "sub-1".to_owned(),
    };

    let registry_clone = registry.clone();
    let marker_clone = marker.clone();
    let ask_handle = tokio::spawn(async move {
        ask(
            &registry_clone,
            TIMEOUT_MS,
            "worker",
            "go",
            None,
            Some(marker_clone),
        )
        .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    {
        let shared = stub.entry.shared.lock().await;
        assert_eq!(shared.active_task.as_ref(), Some(&marker));
        assert_eq!(shared.state, AgentState::Working);
    }

    ask_handle.await.expect("join").expect("ask succeeds");
    let shared = stub.entry.shared.lock().await;
    assert_eq!(shared.active_task, None, "marker cleared on completion");
}
