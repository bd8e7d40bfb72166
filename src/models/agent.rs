//! Agent domain model: kinds, lifecycle states, and status DTOs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::permission::PermissionView;

/// Kind of coding agent fronted by the bridge.
///
/// The four known kinds get type-specific preflight rules and launch
/// candidates; anything else falls through to "binary named after the
/// kind, no credentials, no endpoint".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentKind {
    /// OpenCode (`opencode acp`).
    Opencode,
    /// OpenAI Codex (`codex-acp` or `codex mcp-server`).
    Codex,
    /// Anthropic Claude (`claude-agent-acp`).
    Claude,
    /// Google Gemini (`gemini --experimental-acp`).
    Gemini,
    /// Arbitrary fall-through kind; the string is the binary name.
    Other(String),
}

impl AgentKind {
    /// Parse a kind from its wire string. Unknown strings become
    /// [`AgentKind::Other`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "opencode" => Self::Opencode,
            "codex" => Self::Codex,
            "claude" => Self::Claude,
            "gemini" => Self::Gemini,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Wire string for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Opencode => "opencode",
            Self::Codex => "codex",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Other(name) => name,
        }
    }

    /// The four kinds `/doctor` reports on.
    #[must_use]
    pub fn known() -> [Self; 4] {
        [Self::Codex, Self::Claude, Self::Gemini, Self::Opencode]
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AgentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AgentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().is_empty() {
            return Err(D::Error::custom("agent type must not be empty"));
        }
        Ok(Self::parse(&raw))
    }
}

/// Lifecycle state of a live agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Spawned, handshake not yet complete.
    Starting,
    /// Connected and ready for a prompt.
    Idle,
    /// A prompt is in flight or a permission is pending.
    Working,
    /// Child process has exited.
    Stopped,
    /// Last operation failed; see `lastError`.
    Error,
}

/// Marker tying an in-flight ask to the task subtask that issued it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTaskRef {
    /// Owning task id.
    pub task_id: String,
    /// Subtask id within the task.
    pub subtask_id: String,
}

/// Wire representation of a live agent, returned by the `/agents` routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Unique caller-supplied name.
    pub name: String,
    /// Agent kind.
    #[serde(rename = "type")]
    pub kind: AgentKind,
    /// Working directory of the child process.
    pub cwd: String,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Opaque ACP session identifier captured at handshake.
    pub session_id: String,
    /// Protocol version captured at handshake.
    pub protocol_version: String,
    /// Child process id, when still known.
    pub pid: Option<u32>,
    /// Classified user-facing error; `null` when healthy.
    pub last_error: Option<String>,
    /// Terminal reason of the last prompt, or `"timeout"`.
    pub stop_reason: Option<String>,
    /// Last completed reply text.
    pub last_text: String,
    /// Pending permission requests, oldest first.
    pub pending_permissions: Vec<PermissionView>,
    /// Task marker, set only while a task-driven ask is in flight.
    pub active_task: Option<ActiveTaskRef>,
    /// Tail of the stderr ring (most recent lines).
    pub recent_stderr: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// `POST /agents` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    /// Agent kind; defaults to `opencode`.
    #[serde(rename = "type", default)]
    pub kind: Option<AgentKind>,
    /// Unique agent name.
    pub name: String,
    /// Working directory for the child; daemon cwd when omitted.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Explicit command overriding the built-in candidates.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for the explicit command.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Aggregate status of a single `/doctor` row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoctorStatus {
    /// All checks passed.
    Ok,
    /// Endpoint responded but looks unhealthy.
    Warning,
    /// Binary or required credential missing.
    Error,
}

/// One `/doctor` result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorEntry {
    /// Agent kind the row describes.
    #[serde(rename = "type")]
    pub kind: AgentKind,
    /// Aggregate status.
    pub status: DoctorStatus,
    /// Whether the required binary resolves.
    pub binary: bool,
    /// Whether the required credential is set (`true` when none required).
    pub api_key: bool,
    /// Whether the endpoint responded with a status below 500
    /// (`true` when the kind has no endpoint).
    pub endpoint: bool,
    /// First failure detail, when any check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shape of a configured API key, judged by its prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyFormat {
    /// Prefix matches the provider's convention.
    Valid,
    /// Set, but the prefix does not match.
    Invalid,
    /// Required but not set.
    Missing,
    /// The kind needs no key.
    NotRequired,
    /// A non-key credential is in use (e.g. an auth token).
    Unknown,
}

/// Check block of a `/agents/{name}/diagnose` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseChecks {
    /// Whether the required credential is present.
    pub api_key_set: bool,
    /// Prefix-based key format judgement.
    pub api_key_format: ApiKeyFormat,
    /// Responded and status below 500.
    pub endpoint_reachable: bool,
    /// Probe round-trip, when the endpoint responded.
    pub endpoint_latency_ms: Option<u64>,
    /// Protocol version captured at handshake.
    pub protocol_version: String,
}

/// Deep per-agent health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseReport {
    /// Agent name.
    pub agent: String,
    /// Child neither killed nor exited.
    pub process_alive: bool,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Snapshot of the stderr ring.
    pub recent_stderr: Vec<String>,
    /// Classified last error, when any.
    pub last_error: Option<String>,
    /// Fresh check results.
    pub checks: DiagnoseChecks,
}
