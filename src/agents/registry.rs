//! Process-wide agent record store.
//!
//! The registry is the single source of truth other components read from.
//! Each entry pairs the immutable handshake facts (name, kind, session id,
//! protocol version) with a shared mutable state block the connection
//! supervisor, ask executor, and permission queue all mutate under one
//! lock. The child process and ACP connection themselves live on the
//! supervisor thread; the registry reaches them through the command
//! channel.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::errors::{BridgeError, Result};
use crate::models::agent::{ActiveTaskRef, AgentKind, AgentState, AgentStatus};
use crate::models::permission::{PendingPermission, PermissionView};

use super::supervisor::AgentCommand;

/// Maximum retained stderr lines per agent (drop-oldest).
pub const STDERR_CAP: usize = 50;

/// Stderr lines included in the agent status payload.
const STATUS_STDERR_TAIL: usize = 10;

/// A registered chunk subscriber for one agent's stream fan-out.
#[derive(Debug)]
struct ChunkSubscriber {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Mutable state block of one agent record.
#[derive(Debug)]
pub struct AgentShared {
    /// Lifecycle state.
    pub state: AgentState,
    /// Reply text accumulated during the in-flight prompt.
    pub current_text: String,
    /// Last completed reply text.
    pub last_text: String,
    /// Terminal reason of the last prompt, or `"timeout"`.
    pub stop_reason: Option<String>,
    /// Classified user-facing error; `None` when healthy.
    pub last_error: Option<String>,
    /// Bounded FIFO of trimmed non-empty stderr lines.
    pub stderr_lines: VecDeque<String>,
    /// Pending permission requests, oldest first.
    pub pending_permissions: VecDeque<PendingPermission>,
    /// Task marker, set only while a task-driven ask is in flight.
    pub active_task: Option<ActiveTaskRef>,
    /// Child neither killed nor exited.
    pub process_alive: bool,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    subscribers: Vec<ChunkSubscriber>,
    next_subscriber_id: u64,
}

impl AgentShared {
    /// Fresh state block for an agent entering its handshake.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AgentState::Starting,
            current_text: String::new(),
            last_text: String::new(),
            stop_reason: None,
            last_error: None,
            stderr_lines: VecDeque::new(),
            pending_permissions: VecDeque::new(),
            active_task: None,
            process_alive: true,
            updated_at: Utc::now(),
            subscribers: Vec::new(),
            next_subscriber_id: 1,
        }
    }

    /// Refresh the mutation timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record one stderr line: trimmed, non-empty, ring capped at
    /// [`STDERR_CAP`] with drop-oldest. The latest line also becomes
    /// `last_error`.
    pub fn push_stderr_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.stderr_lines.len() == STDERR_CAP {
            self.stderr_lines.pop_front();
        }
        self.stderr_lines.push_back(trimmed.to_owned());
        self.last_error = Some(trimmed.to_owned());
        self.touch();
    }

    /// Append a streamed reply chunk and publish it to every subscriber
    /// in registration order. Publishing is fire-and-forget; a closed
    /// subscriber is pruned.
    pub fn append_chunk(&mut self, text: &str) {
        self.current_text.push_str(text);
        self.last_text = self.current_text.clone();
        self.subscribers
            .retain(|sub| sub.tx.send(text.to_owned()).is_ok());
        self.touch();
    }

    /// Register a chunk subscriber for the duration of one ask.
    pub fn subscribe(&mut self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.push(ChunkSubscriber { id, tx });
        id
    }

    /// Remove a chunk subscriber. Idempotent.
    pub fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|sub| sub.id != id);
    }

    /// Resolve every queued permission with `cancelled`. Returns the count.
    pub fn cancel_pending_permissions(&mut self) -> usize {
        let drained: Vec<PendingPermission> = self.pending_permissions.drain(..).collect();
        let count = drained.len();
        for pending in drained {
            pending.resolve(crate::models::permission::PermissionDecision::Cancelled);
        }
        if count > 0 {
            self.touch();
        }
        count
    }

    /// Record child exit: cancel pendings, transition to `stopped` unless
    /// already `error`, and keep the first recorded error.
    pub fn mark_exited(&mut self, detail: Option<String>) {
        self.cancel_pending_permissions();
        self.process_alive = false;
        if self.state != AgentState::Error {
            self.state = AgentState::Stopped;
        }
        if self.last_error.is_none() {
            self.last_error = detail;
        }
        self.touch();
    }

    /// Snapshot of the pending permission queue.
    #[must_use]
    pub fn permission_views(&self) -> Vec<PermissionView> {
        self.pending_permissions
            .iter()
            .map(PendingPermission::view)
            .collect()
    }

    /// Most recent stderr lines, oldest first.
    #[must_use]
    pub fn stderr_tail(&self, max: usize) -> Vec<String> {
        let skip = self.stderr_lines.len().saturating_sub(max);
        self.stderr_lines.iter().skip(skip).cloned().collect()
    }
}

impl Default for AgentShared {
    fn default() -> Self {
        Self::new()
    }
}

/// One live agent: immutable handshake facts plus the shared state block
/// and the command channel into the supervisor thread.
#[derive(Debug)]
pub struct AgentEntry {
    /// Unique caller-supplied name.
    pub name: String,
    /// Agent kind.
    pub kind: AgentKind,
    /// Working directory of the child.
    pub cwd: PathBuf,
    /// Opaque ACP session id; immutable after construction.
    pub session_id: String,
    /// Protocol version captured at handshake; immutable.
    pub protocol_version: String,
    /// Child process id at spawn time.
    pub pid: Option<u32>,
    /// Environment the child was launched with (used by diagnose).
    pub env: HashMap<String, String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Shared mutable state.
    pub shared: Arc<Mutex<AgentShared>>,
    cmd_tx: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentEntry {
    /// Assemble an entry from handshake facts and the supervisor channel.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        kind: AgentKind,
        cwd: PathBuf,
        session_id: String,
        protocol_version: String,
        pid: Option<u32>,
        env: HashMap<String, String>,
        shared: Arc<Mutex<AgentShared>>,
        cmd_tx: mpsc::UnboundedSender<AgentCommand>,
    ) -> Self {
        Self {
            name,
            kind,
            cwd,
            session_id,
            protocol_version,
            pid,
            env,
            created_at: Utc::now(),
            shared,
            cmd_tx,
        }
    }

    /// Deliver a command to the supervisor thread.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Agent`] when the supervisor has gone away
    /// (child exited and the loop drained).
    pub fn send(&self, command: AgentCommand) -> Result<()> {
        self.cmd_tx.send(command).map_err(|_| {
            BridgeError::Agent(format!("agent '{}' connection closed", self.name))
        })
    }

    /// Wire status snapshot of this agent.
    pub async fn status(&self) -> AgentStatus {
        let shared = self.shared.lock().await;
        AgentStatus {
            name: self.name.clone(),
            kind: self.kind.clone(),
            cwd: self.cwd.to_string_lossy().into_owned(),
            state: shared.state,
            session_id: self.session_id.clone(),
            protocol_version: self.protocol_version.clone(),
            pid: self.pid,
            last_error: shared.last_error.clone(),
            stop_reason: shared.stop_reason.clone(),
            last_text: shared.last_text.clone(),
            pending_permissions: shared.permission_views(),
            active_task: shared.active_task.clone(),
            recent_stderr: shared.stderr_tail(STATUS_STDERR_TAIL),
            created_at: self.created_at,
            updated_at: shared.updated_at,
        }
    }
}

/// Keyed registry of live agents.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<AgentEntry>>>>,
}

impl AgentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] when the name is already taken.
    pub async fn insert(&self, entry: Arc<AgentEntry>) -> Result<()> {
        let mut agents = self.inner.write().await;
        if agents.contains_key(&entry.name) {
            return Err(BridgeError::Validation(format!(
                "agent '{}' already exists",
                entry.name
            )));
        }
        agents.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Look up an agent by name.
    pub async fn get(&self, name: &str) -> Option<Arc<AgentEntry>> {
        self.inner.read().await.get(name).cloned()
    }

    /// Look up an agent, mapping absence to the standard 404.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] when no agent has that name.
    pub async fn require(&self, name: &str) -> Result<Arc<AgentEntry>> {
        self.get(name)
            .await
            .ok_or_else(|| BridgeError::NotFound(format!("agent '{name}' not found")))
    }

    /// Deregister and return an agent.
    pub async fn remove(&self, name: &str) -> Option<Arc<AgentEntry>> {
        self.inner.write().await.remove(name)
    }

    /// All agents, sorted by name.
    pub async fn list(&self) -> Vec<Arc<AgentEntry>> {
        let mut entries: Vec<Arc<AgentEntry>> =
            self.inner.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Number of live agents.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}
