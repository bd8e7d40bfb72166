//! Task graph domain model: states, creation payloads, and status DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// At least one subtask is pending or running.
    Running,
    /// Every subtask finished successfully.
    Done,
    /// At least one subtask errored and the rest are terminal.
    Error,
    /// User-cancelled, or every subtask was cancelled.
    Cancelled,
}

impl TaskState {
    /// Whether this state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Lifecycle state of a subtask. Transitions are monotonic:
/// pending → running → {done | error | cancelled}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    /// Waiting on dependencies.
    Pending,
    /// Prompt dispatched to the agent.
    Running,
    /// Finished with a result.
    Done,
    /// Finished with an error.
    Error,
    /// Cancelled before or during execution.
    Cancelled,
}

impl SubtaskState {
    /// Whether this state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// One subtask in a `POST /tasks` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskSpec {
    /// Stable id within the task; `subtask-<N>` assigned when omitted.
    #[serde(default)]
    pub id: Option<String>,
    /// Name of the agent that runs the prompt.
    pub agent: String,
    /// Prompt template; `{{ <id>.result }}` renders a dependency's result.
    pub prompt: String,
    /// Sibling ids that must be terminal before this subtask starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// `POST /tasks` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// Human-readable task name.
    pub name: String,
    /// Subtask graph, in declaration order.
    pub subtasks: Vec<SubtaskSpec>,
}

/// Wire representation of one subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskStatus {
    /// Stable id within the task.
    pub id: String,
    /// Target agent name.
    pub agent: String,
    /// Prompt template as submitted.
    pub prompt: String,
    /// Dependency ids.
    pub depends_on: Vec<String>,
    /// Current state.
    pub state: SubtaskState,
    /// Final reply text, when done.
    pub result: Option<String>,
    /// Classified error message, when errored.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Wire representation of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Task UUID.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Current state.
    pub state: TaskState,
    /// Subtasks in declaration order.
    pub subtasks: Vec<SubtaskStatus>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}
