//! Pending permission model.
//!
//! An inbound ACP `requestPermission` call blocks the agent until the
//! bridge answers. Each request is parked as a [`PendingPermission`]
//! holding a one-shot resolver; an HTTP caller later completes it with
//! approve, deny, or cancel.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Process-wide monotonic counter for permission request ids.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide permission request id.
#[must_use]
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// One advertised permission option, as shown to HTTP callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOptionView {
    /// Opaque option identifier echoed back on approval.
    pub option_id: String,
    /// Human-readable option label.
    pub name: String,
    /// Option kind (`allow_once`, `allow_always`, `reject_once`, …).
    pub kind: String,
}

impl PermissionOptionView {
    /// Whether this option is an allow-family option.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.kind.starts_with("allow")
    }

    /// Whether this option is a reject-family option.
    #[must_use]
    pub fn is_reject(&self) -> bool {
        self.kind.starts_with("reject")
    }
}

/// Serializable snapshot of an ACP permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionParamsView {
    /// Title of the tool call that triggered the request.
    pub tool_title: Option<String>,
    /// Options advertised by the agent, in protocol order.
    pub options: Vec<PermissionOptionView>,
}

/// Wire representation of one queued permission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionView {
    /// Process-wide monotonic id (observability only).
    pub request_id: u64,
    /// Snapshot of the ACP request.
    pub params: PermissionParamsView,
    /// When the agent asked.
    pub requested_at: DateTime<Utc>,
}

/// Resolution delivered through a pending permission's one-shot channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    /// An advertised option was selected.
    Selected {
        /// The chosen option id.
        option_id: String,
    },
    /// The request was cancelled without a selection.
    Cancelled,
}

/// A parked permission request awaiting an HTTP resolution.
#[derive(Debug)]
pub struct PendingPermission {
    /// Process-wide monotonic id.
    pub request_id: u64,
    /// Snapshot of the ACP request.
    pub params: PermissionParamsView,
    /// When the agent asked.
    pub requested_at: DateTime<Utc>,
    resolver: oneshot::Sender<PermissionDecision>,
}

impl PendingPermission {
    /// Park a new request around its one-shot resolver.
    #[must_use]
    pub fn new(params: PermissionParamsView, resolver: oneshot::Sender<PermissionDecision>) -> Self {
        Self {
            request_id: next_request_id(),
            params,
            requested_at: Utc::now(),
            resolver,
        }
    }

    /// Complete the request exactly once. A dropped receiver (the agent
    /// went away mid-wait) is not an error.
    pub fn resolve(self, decision: PermissionDecision) {
        let _ = self.resolver.send(decision);
    }

    /// Wire snapshot of this entry.
    #[must_use]
    pub fn view(&self) -> PermissionView {
        PermissionView {
            request_id: self.request_id,
            params: self.params.clone(),
            requested_at: self.requested_at,
        }
    }
}
