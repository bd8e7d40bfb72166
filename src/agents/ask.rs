//! Ask executor: one prompt at a time per agent.
//!
//! Applies the per-agent prompt mutex at the state transition, attaches
//! an optional chunk subscriber for the duration of the call, enforces
//! the wall-clock timeout, and classifies failures. The child is never
//! killed on timeout — the agent merely returns to `idle`.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::classify::classify;
use crate::errors::{BridgeError, Result};
use crate::models::agent::{ActiveTaskRef, AgentState};

use super::registry::AgentRegistry;
use super::supervisor::AgentCommand;

/// Wire result of a completed ask.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskOutcome {
    /// Agent name.
    pub name: String,
    /// Agent state after the ask (`idle`).
    pub state: AgentState,
    /// Terminal reason reported by the agent.
    pub stop_reason: Option<String>,
    /// Aggregated reply text.
    pub response: String,
}

/// Run one prompt against a named agent.
///
/// Preconditions: the agent exists and is not `working`. The optional
/// `on_chunk` sender receives every streamed chunk for the duration of
/// this call and is deregistered on every exit path, timeout included.
///
/// # Errors
///
/// - [`BridgeError::NotFound`] — unknown agent.
/// - [`BridgeError::AgentBusy`] — a prompt is already in flight.
/// - [`BridgeError::Timeout`] — the wall-clock deadline elapsed.
/// - [`BridgeError::Agent`] — the prompt failed; message is classified.
pub async fn ask(
    registry: &AgentRegistry,
    timeout_ms: u64,
    name: &str,
    prompt: &str,
    on_chunk: Option<mpsc::UnboundedSender<String>>,
    active_task: Option<ActiveTaskRef>,
) -> Result<AskOutcome> {
    let entry = registry.require(name).await?;

    // Claim the agent: the busy check and the transition to `working`
    // happen under one lock acquisition.
    let subscriber_id = {
        let mut shared = entry.shared.lock().await;
        if shared.state == AgentState::Working {
            return Err(BridgeError::AgentBusy(format!(
                "agent '{name}' already has a prompt in flight"
            )));
        }
        shared.state = AgentState::Working;
        shared.current_text.clear();
        shared.stop_reason = None;
        shared.active_task.clone_from(&active_task);
        shared.touch();
        on_chunk.map(|tx| shared.subscribe(tx))
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if let Err(err) = entry.send(AgentCommand::Prompt {
        text: prompt.to_owned(),
        reply: reply_tx,
    }) {
        finish(&entry, subscriber_id, &active_task, |shared| {
            shared.state = AgentState::Error;
            shared.last_error = Some(err.to_string());
        })
        .await;
        return Err(err);
    }

    let raced = tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), reply_rx).await;

    match raced {
        Err(_elapsed) => {
            let message = format!("ask timeout after {timeout_ms}ms");
            warn!(agent = %name, %message, "ask timed out");
            finish(&entry, subscriber_id, &active_task, |shared| {
                shared.state = AgentState::Idle;
                shared.stop_reason = Some("timeout".to_owned());
                shared.last_error = Some(message.clone());
                // A permission parked mid-prompt must not outlive the
                // turn: idle agents have an empty queue.
                shared.cancel_pending_permissions();
            })
            .await;
            Err(BridgeError::Timeout(message))
        }
        Ok(Err(_closed)) => {
            let message = format!("agent '{name}' exited during prompt");
            finish(&entry, subscriber_id, &active_task, |shared| {
                shared.state = AgentState::Error;
                shared.last_error = Some(message.clone());
                shared.cancel_pending_permissions();
            })
            .await;
            Err(BridgeError::Agent(message))
        }
        Ok(Ok(Err(raw))) => {
            let classified = classify(&raw);
            finish(&entry, subscriber_id, &active_task, |shared| {
                shared.state = AgentState::Error;
                shared.last_error = Some(classified.clone());
                shared.cancel_pending_permissions();
            })
            .await;
            Err(BridgeError::Agent(classified))
        }
        Ok(Ok(Ok(outcome))) => {
            let mut response = String::new();
            finish(&entry, subscriber_id, &active_task, |shared| {
                shared.state = AgentState::Idle;
                shared.stop_reason.clone_from(&outcome.stop_reason);
                shared.last_text = shared.current_text.clone();
                response = shared.current_text.clone();
            })
            .await;
            Ok(AskOutcome {
                name: name.to_owned(),
                state: AgentState::Idle,
                stop_reason: outcome.stop_reason,
                response,
            })
        }
    }
}

/// Common exit path: apply the state mutation, deregister the chunk
/// subscriber, and clear the task marker — but only while it still
/// matches the claim this ask set, so a newer claim is never clobbered.
async fn finish(
    entry: &super::registry::AgentEntry,
    subscriber_id: Option<u64>,
    claim: &Option<ActiveTaskRef>,
    mutate: impl FnOnce(&mut super::registry::AgentShared),
) {
    let mut shared = entry.shared.lock().await;
    mutate(&mut *shared);
    if let Some(id) = subscriber_id {
        shared.unsubscribe(id);
    }
    if shared.active_task == *claim {
        shared.active_task = None;
    }
    shared.touch();
}
