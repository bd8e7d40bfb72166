//! ACP `Client` implementation fanning inbound notifications into the
//! agent record.
//!
//! Message chunks accumulate on the record and are published to every
//! registered subscriber; tool-call markers pin the agent in `working`;
//! permission requests are parked on the pending queue and block the
//! agent until an HTTP caller resolves them.

use std::sync::Arc;

use agent_client_protocol::{
    self as acp, ContentBlock, ContentChunk, PermissionOptionId, PermissionOptionKind,
    RequestPermissionOutcome, RequestPermissionRequest, RequestPermissionResponse,
    SelectedPermissionOutcome, SessionNotification, SessionUpdate,
};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::models::agent::AgentState;
use crate::models::permission::{
    PendingPermission, PermissionDecision, PermissionOptionView, PermissionParamsView,
};

use super::registry::AgentShared;

/// Per-agent inbound notification handler.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    agent_name: String,
    shared: Arc<Mutex<AgentShared>>,
}

impl BridgeClient {
    /// Bind a client to one agent's shared state block.
    #[must_use]
    pub fn new(agent_name: String, shared: Arc<Mutex<AgentShared>>) -> Self {
        Self { agent_name, shared }
    }

    /// Text rendering of a content chunk; non-text content degrades to a
    /// JSON rendition rather than being dropped.
    fn chunk_text(chunk: &ContentChunk) -> String {
        match &chunk.content {
            ContentBlock::Text(text) => text.text.clone(),
            other => serde_json::to_string(other).unwrap_or_else(|_| "<non-text-content>".into()),
        }
    }

    /// Stable label for a permission option kind.
    fn kind_label(kind: &PermissionOptionKind) -> String {
        match kind {
            PermissionOptionKind::AllowOnce => "allow_once".to_owned(),
            PermissionOptionKind::AllowAlways => "allow_always".to_owned(),
            PermissionOptionKind::RejectOnce => "reject_once".to_owned(),
            PermissionOptionKind::RejectAlways => "reject_always".to_owned(),
            other => format!("{other:?}").to_lowercase(),
        }
    }

    /// Serializable snapshot of an inbound permission request.
    fn snapshot(args: &RequestPermissionRequest) -> PermissionParamsView {
        PermissionParamsView {
            tool_title: args.tool_call.fields.title.clone(),
            options: args
                .options
                .iter()
                .map(|option| PermissionOptionView {
                    option_id: option.option_id.0.to_string(),
                    name: option.name.clone(),
                    kind: Self::kind_label(&option.kind),
                })
                .collect(),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl acp::Client for BridgeClient {
    async fn request_permission(
        &self,
        args: RequestPermissionRequest,
    ) -> acp::Result<RequestPermissionResponse> {
        let (tx, rx) = oneshot::channel::<PermissionDecision>();
        let request_id = {
            let mut shared = self.shared.lock().await;
            let pending = PendingPermission::new(Self::snapshot(&args), tx);
            let request_id = pending.request_id;
            shared.pending_permissions.push_back(pending);
            shared.state = AgentState::Working;
            shared.touch();
            request_id
        };
        debug!(agent = %self.agent_name, request_id, "permission request parked");

        let outcome = match rx.await {
            Ok(PermissionDecision::Selected { option_id }) => RequestPermissionOutcome::Selected(
                SelectedPermissionOutcome::new(PermissionOptionId::new(option_id)),
            ),
            Ok(PermissionDecision::Cancelled) | Err(_) => RequestPermissionOutcome::Cancelled,
        };
        Ok(RequestPermissionResponse::new(outcome))
    }

    async fn session_notification(&self, args: SessionNotification) -> acp::Result<()> {
        match args.update {
            SessionUpdate::AgentMessageChunk(chunk) => {
                let text = Self::chunk_text(&chunk);
                self.shared.lock().await.append_chunk(&text);
            }
            SessionUpdate::ToolCall(_) => {
                let mut shared = self.shared.lock().await;
                if shared.state != AgentState::Working {
                    shared.state = AgentState::Working;
                }
                shared.touch();
            }
            _ => {}
        }
        Ok(())
    }
}
