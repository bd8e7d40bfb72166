//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Request validation failure (missing name, bad prompt, invalid DAG).
    Validation(String),
    /// Pre-spawn gate failure: binary, credential, or endpoint check.
    Preflight(String),
    /// Agent spawn or ACP handshake failure.
    Spawn(String),
    /// Requested agent, task, or subtask does not exist.
    NotFound(String),
    /// Agent already has a prompt in flight.
    AgentBusy(String),
    /// Permission resolution requested while nothing is pending.
    NoPendingPermissions(String),
    /// Ask exceeded its wall-clock deadline.
    Timeout(String),
    /// Classified upstream failure returned by an agent.
    Agent(String),
    /// Configuration parsing or startup failure.
    Config(String),
    /// Unhandled internal failure.
    Internal(String),
}

impl BridgeError {
    /// HTTP status code matching the failure class.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Preflight(_) | Self::Spawn(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AgentBusy(_) | Self::NoPendingPermissions(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Agent(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code carried alongside the message.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Preflight(_) => "preflight",
            Self::Spawn(_) => "spawn",
            Self::NotFound(_) => "not_found",
            Self::AgentBusy(_) => "agent_busy",
            Self::NoPendingPermissions(_) => "no_pending_permissions",
            Self::Timeout(_) => "timeout",
            Self::Agent(_) => "agent_error",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// The user-facing message carried by this error.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(msg)
            | Self::Preflight(msg)
            | Self::Spawn(msg)
            | Self::NotFound(msg)
            | Self::AgentBusy(msg)
            | Self::NoPendingPermissions(msg)
            | Self::Timeout(msg)
            | Self::Agent(msg)
            | Self::Config(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for BridgeError {}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.message(),
            "details": self.code(),
        }));
        (status, body).into_response()
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json encoding failed: {err}"))
    }
}
