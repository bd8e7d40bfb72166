//! In-memory task registry and runtime handles.
//!
//! Tasks and subtasks pair immutable graph facts with a mutable block
//! under a lock, plus one-shot broadcast signals: every subtask exposes a
//! terminal signal fired exactly once on any terminal transition, and
//! every task exposes a cancel signal that wakes all waiters.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::errors::{BridgeError, Result};
use crate::models::task::{SubtaskState, SubtaskStatus, TaskState, TaskStatus};

/// Eviction limits for terminal tasks.
#[derive(Debug, Clone, Copy)]
pub struct TaskLimits {
    /// Cap on retained terminal tasks.
    pub max_completed: usize,
    /// Terminal-task TTL in milliseconds.
    pub ttl_ms: u64,
}

/// Mutable block of a subtask.
#[derive(Debug)]
pub struct SubtaskMut {
    /// Current state.
    pub state: SubtaskState,
    /// Final reply text, when done.
    pub result: Option<String>,
    /// Classified error, when errored.
    pub error: Option<String>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One subtask: immutable graph facts plus the mutable block and the
/// one-shot terminal signal.
#[derive(Debug)]
pub struct SubtaskHandle {
    /// Stable id within the task.
    pub id: String,
    /// Target agent name.
    pub agent: String,
    /// Prompt template as submitted.
    pub prompt: String,
    /// Sibling dependency ids.
    pub depends_on: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Fired exactly once when the subtask turns terminal.
    pub terminal: CancellationToken,
    /// Mutable block.
    pub state: Mutex<SubtaskMut>,
}

impl SubtaskHandle {
    /// Fresh pending subtask.
    #[must_use]
    pub fn new(id: String, agent: String, prompt: String, depends_on: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent,
            prompt,
            depends_on,
            created_at: now,
            terminal: CancellationToken::new(),
            state: Mutex::new(SubtaskMut {
                state: SubtaskState::Pending,
                result: None,
                error: None,
                started_at: None,
                completed_at: None,
                updated_at: now,
            }),
        }
    }

    /// Whether the subtask has reached a terminal state.
    pub async fn is_terminal(&self) -> bool {
        self.state.lock().await.state.is_terminal()
    }

    /// Move to a terminal state and fire the terminal signal.
    pub async fn complete(&self, state: SubtaskState, result: Option<String>, error: Option<String>) {
        debug_assert!(state.is_terminal());
        {
            let mut block = self.state.lock().await;
            if block.state.is_terminal() {
                return;
            }
            block.state = state;
            block.result = result;
            block.error = error;
            let now = Utc::now();
            block.completed_at = Some(now);
            block.updated_at = now;
        }
        self.terminal.cancel();
    }

    /// Wire snapshot.
    pub async fn status(&self) -> SubtaskStatus {
        let block = self.state.lock().await;
        SubtaskStatus {
            id: self.id.clone(),
            agent: self.agent.clone(),
            prompt: self.prompt.clone(),
            depends_on: self.depends_on.clone(),
            state: block.state,
            result: block.result.clone(),
            error: block.error.clone(),
            created_at: self.created_at,
            updated_at: block.updated_at,
            started_at: block.started_at,
            completed_at: block.completed_at,
        }
    }
}

/// Mutable block of a task.
#[derive(Debug)]
pub struct TaskMut {
    /// Current state.
    pub state: TaskState,
    /// Cooperative cancellation flag.
    pub cancel_requested: bool,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One task: the subtask graph, the mutable block, and the fan-out cancel
/// signal.
#[derive(Debug)]
pub struct TaskHandle {
    /// Task UUID.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Wakes every dependency waiter on cancellation.
    pub cancel: CancellationToken,
    /// Subtasks in declaration order.
    pub subtasks: Vec<Arc<SubtaskHandle>>,
    /// Mutable block.
    pub state: Mutex<TaskMut>,
}

impl TaskHandle {
    /// Fresh running task over a validated subtask list.
    #[must_use]
    pub fn new(id: String, name: String, subtasks: Vec<Arc<SubtaskHandle>>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            created_at: now,
            cancel: CancellationToken::new(),
            subtasks,
            state: Mutex::new(TaskMut {
                state: TaskState::Running,
                cancel_requested: false,
                updated_at: now,
            }),
        }
    }

    /// Find a subtask by id.
    #[must_use]
    pub fn subtask(&self, id: &str) -> Option<Arc<SubtaskHandle>> {
        self.subtasks.iter().find(|sub| sub.id == id).cloned()
    }

    /// Whether cancellation was requested or the task is already
    /// cancelled.
    pub async fn cancel_requested(&self) -> bool {
        let block = self.state.lock().await;
        block.cancel_requested || block.state == TaskState::Cancelled
    }

    /// Wire snapshot including every subtask.
    pub async fn status(&self) -> TaskStatus {
        let mut subtasks = Vec::with_capacity(self.subtasks.len());
        for sub in &self.subtasks {
            subtasks.push(sub.status().await);
        }
        let block = self.state.lock().await;
        TaskStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            state: block.state,
            subtasks,
            created_at: self.created_at,
            updated_at: block.updated_at,
        }
    }
}

/// Process-wide registry of tasks.
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<String, Arc<TaskHandle>>>>,
    limits: TaskLimits,
}

impl TaskStore {
    /// Empty store with the given eviction limits.
    #[must_use]
    pub fn new(limits: TaskLimits) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    /// Eviction limits.
    #[must_use]
    pub fn limits(&self) -> TaskLimits {
        self.limits
    }

    /// Register a task.
    pub async fn insert(&self, task: Arc<TaskHandle>) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Look up a task by id.
    pub async fn get(&self, id: &str) -> Option<Arc<TaskHandle>> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Look up a task, mapping absence to the standard 404.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] when no task has that id.
    pub async fn require(&self, id: &str) -> Result<Arc<TaskHandle>> {
        self.get(id)
            .await
            .ok_or_else(|| BridgeError::NotFound(format!("task '{id}' not found")))
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<Arc<TaskHandle>> {
        let mut tasks: Vec<Arc<TaskHandle>> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Number of stored tasks.
    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Remove a batch of tasks by id.
    pub async fn remove_batch(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let mut tasks = self.tasks.write().await;
        for id in ids {
            tasks.remove(id);
        }
    }
}
