//! Permission queue resolution.
//!
//! ACP permission callbacks block the agent over stdio; the bridge parks
//! each one as a [`PendingPermission`] and exposes three resolutions:
//! approve and deny act on the queue head, cancel-all drains the queue.
//! Ids are observable only — callers cannot target a specific entry.

use serde::Serialize;
use tracing::info;

use crate::errors::{BridgeError, Result};
use crate::models::permission::{PermissionDecision, PermissionParamsView};

use super::registry::AgentEntry;

/// Which option family a resolution prefers when no explicit id is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionPreference {
    Allow,
    Reject,
}

/// Wire result of resolving the head permission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResolution {
    /// Agent the resolution applied to.
    pub name: String,
    /// Id of the resolved request.
    pub request_id: u64,
    /// Selected option id, absent when the request had no options.
    pub option_id: Option<String>,
    /// `selected` or `cancelled`.
    pub outcome: String,
    /// Requests still queued after this resolution.
    pub pending: usize,
}

/// Approve the head request, preferring allow-kind options.
///
/// # Errors
///
/// Returns [`BridgeError::NoPendingPermissions`] when the queue is empty.
pub async fn approve(entry: &AgentEntry, option_id: Option<String>) -> Result<PermissionResolution> {
    resolve_head(entry, option_id, OptionPreference::Allow).await
}

/// Deny the head request, preferring reject-kind options.
///
/// # Errors
///
/// Returns [`BridgeError::NoPendingPermissions`] when the queue is empty.
pub async fn deny(entry: &AgentEntry, option_id: Option<String>) -> Result<PermissionResolution> {
    resolve_head(entry, option_id, OptionPreference::Reject).await
}

/// Resolve every queued request with `cancelled`. Idempotent; returns the
/// number of requests drained.
pub async fn cancel_all(entry: &AgentEntry) -> usize {
    let count = entry.shared.lock().await.cancel_pending_permissions();
    if count > 0 {
        info!(agent = %entry.name, count, "pending permissions cancelled");
    }
    count
}

async fn resolve_head(
    entry: &AgentEntry,
    option_id: Option<String>,
    preference: OptionPreference,
) -> Result<PermissionResolution> {
    let mut shared = entry.shared.lock().await;
    let Some(pending) = shared.pending_permissions.pop_front() else {
        return Err(BridgeError::NoPendingPermissions(format!(
            "no pending permissions for agent '{}'",
            entry.name
        )));
    };

    let request_id = pending.request_id;
    let selected = choose_option(&pending.params, option_id.as_deref(), preference);
    let outcome = match selected.clone() {
        Some(option_id) => {
            pending.resolve(PermissionDecision::Selected { option_id });
            "selected"
        }
        None => {
            pending.resolve(PermissionDecision::Cancelled);
            "cancelled"
        }
    };
    shared.touch();
    let remaining = shared.pending_permissions.len();
    drop(shared);

    info!(
        agent = %entry.name,
        request_id,
        outcome,
        option = selected.as_deref().unwrap_or("-"),
        "permission resolved"
    );

    Ok(PermissionResolution {
        name: entry.name.clone(),
        request_id,
        option_id: selected,
        outcome: outcome.to_owned(),
        pending: remaining,
    })
}

/// Pick the option to answer with: an explicitly requested id when it is
/// advertised, else the first option of the preferred kind, else the
/// first option overall.
fn choose_option(
    params: &PermissionParamsView,
    requested: Option<&str>,
    preference: OptionPreference,
) -> Option<String> {
    if let Some(requested) = requested {
        if params
            .options
            .iter()
            .any(|option| option.option_id == requested)
        {
            return Some(requested.to_owned());
        }
    }

    let preferred = params.options.iter().find(|option| match preference {
        OptionPreference::Allow => option.is_allow(),
        OptionPreference::Reject => option.is_reject(),
    });
    preferred
        .or_else(|| params.options.first())
        .map(|option| option.option_id.clone())
}
