//! Task DAG scheduler.
//!
//! Validates the subtask graph at creation, launches one execution unit
//! per subtask, and resolves dependencies event-driven: every waiter
//! parks on the first of the task cancel signal and its pending
//! dependencies' terminal signals — no polling. Subtask failures are
//! local; only task-level cancellation cascades.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agents::ask::ask;
use crate::agents::permissions;
use crate::agents::registry::AgentRegistry;
use crate::agents::supervisor::AgentCommand;
use crate::errors::{BridgeError, Result};
use crate::models::agent::{ActiveTaskRef, AgentState};
use crate::models::task::{CreateTaskRequest, SubtaskState, TaskState};

use super::eviction::evict_terminal_tasks;
use super::store::{SubtaskHandle, TaskHandle, TaskStore};
use super::template::render_prompt;

/// Shared context handed to every execution unit.
#[derive(Debug, Clone)]
pub struct SchedulerContext {
    /// Task registry.
    pub store: TaskStore,
    /// Agent registry.
    pub registry: AgentRegistry,
    /// Ask wall-clock timeout.
    pub ask_timeout_ms: u64,
}

/// Validate a task request, store it, and launch its execution units.
///
/// # Errors
///
/// Returns [`BridgeError::Validation`] for an empty name, empty subtask
/// list, missing agent/prompt, duplicate or unknown ids, self-edges, or
/// a dependency cycle.
pub async fn create_task(ctx: &SchedulerContext, request: CreateTaskRequest) -> Result<Arc<TaskHandle>> {
    let subtasks = validate(&request)?;
    let task = Arc::new(TaskHandle::new(
        Uuid::new_v4().to_string(),
        request.name.trim().to_owned(),
        subtasks,
    ));
    ctx.store.insert(Arc::clone(&task)).await;

    for sub in &task.subtasks {
        tokio::spawn(run_subtask(
            ctx.clone(),
            Arc::clone(&task),
            Arc::clone(sub),
        ));
    }

    info!(task_id = %task.id, name = %task.name, subtasks = task.subtasks.len(), "task launched");
    Ok(task)
}

/// Validate and materialize the subtask graph.
fn validate(request: &CreateTaskRequest) -> Result<Vec<Arc<SubtaskHandle>>> {
    if request.name.trim().is_empty() {
        return Err(BridgeError::Validation("task name is required".to_owned()));
    }
    if request.subtasks.is_empty() {
        return Err(BridgeError::Validation(
            "task requires at least one subtask".to_owned(),
        ));
    }

    let mut ids: HashSet<String> = HashSet::new();
    let mut built: Vec<Arc<SubtaskHandle>> = Vec::with_capacity(request.subtasks.len());

    for (index, spec) in request.subtasks.iter().enumerate() {
        let id = spec
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| format!("subtask-{}", index + 1), str::to_owned);

        if !ids.insert(id.clone()) {
            return Err(BridgeError::Validation(format!(
                "duplicate subtask id '{id}'"
            )));
        }
        if spec.agent.trim().is_empty() {
            return Err(BridgeError::Validation(format!(
                "subtask '{id}' requires an agent"
            )));
        }
        if spec.prompt.trim().is_empty() {
            return Err(BridgeError::Validation(format!(
                "subtask '{id}' requires a prompt"
            )));
        }

        let depends_on: Vec<String> = spec
            .depends_on
            .iter()
            .map(|dep| dep.trim().to_owned())
            .filter(|dep| !dep.is_empty())
            .collect();
        if depends_on.iter().any(|dep| dep == &id) {
            return Err(BridgeError::Validation(format!(
                "subtask '{id}' cannot depend on itself"
            )));
        }

        built.push(Arc::new(SubtaskHandle::new(
            id,
            spec.agent.trim().to_owned(),
            spec.prompt.clone(),
            depends_on,
        )));
    }

    for sub in &built {
        for dep in &sub.depends_on {
            if !ids.contains(dep) {
                return Err(BridgeError::Validation(format!(
                    "subtask '{}' depends on unknown subtask '{dep}'",
                    sub.id
                )));
            }
        }
    }

    detect_cycle(&built)?;
    Ok(built)
}

/// DFS three-color cycle detection over the dependency edges.
fn detect_cycle(subtasks: &[Arc<SubtaskHandle>]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Finished,
    }

    let edges: HashMap<&str, &[String]> = subtasks
        .iter()
        .map(|sub| (sub.id.as_str(), sub.depends_on.as_slice()))
        .collect();
    let mut marks: HashMap<&str, Mark> =
        subtasks.iter().map(|sub| (sub.id.as_str(), Mark::Unvisited)).collect();

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(node).copied() {
            Some(Mark::Finished) => return true,
            Some(Mark::InProgress) => return false,
            _ => {}
        }
        marks.insert(node, Mark::InProgress);
        if let Some(deps) = edges.get(node) {
            for dep in deps.iter() {
                if !visit(dep.as_str(), edges, marks) {
                    return false;
                }
            }
        }
        marks.insert(node, Mark::Finished);
        true
    }

    for sub in subtasks {
        if !visit(sub.id.as_str(), &edges, &mut marks) {
            return Err(BridgeError::Validation(
                "subtask dependency cycle detected".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Execution unit for one subtask.
async fn run_subtask(ctx: SchedulerContext, task: Arc<TaskHandle>, sub: Arc<SubtaskHandle>) {
    // Cancelled before it ever started.
    if task.cancel_requested().await {
        sub.complete(SubtaskState::Cancelled, None, None).await;
        recompute_task_state(&task).await;
        return;
    }

    // Event-driven dependency wait: park on the first of the task cancel
    // signal and each pending dependency's terminal signal, then
    // re-examine.
    loop {
        let mut pending: Vec<Arc<SubtaskHandle>> = Vec::new();
        for dep_id in &sub.depends_on {
            if let Some(dep) = task.subtask(dep_id) {
                if !dep.is_terminal().await {
                    pending.push(dep);
                }
            }
        }
        if pending.is_empty() {
            break;
        }

        let mut waiters: Vec<Pin<Box<dyn Future<Output = ()> + Send>>> =
            Vec::with_capacity(pending.len() + 1);
        waiters.push(Box::pin(task.cancel.clone().cancelled_owned()));
        for dep in &pending {
            waiters.push(Box::pin(dep.terminal.clone().cancelled_owned()));
        }
        futures_util::future::select_all(waiters).await;

        if task.cancel_requested().await {
            sub.complete(SubtaskState::Cancelled, None, None).await;
            recompute_task_state(&task).await;
            return;
        }
    }

    if task.cancel_requested().await {
        sub.complete(SubtaskState::Cancelled, None, None).await;
        recompute_task_state(&task).await;
        return;
    }

    // Render the prompt against sibling results.
    let mut results: HashMap<String, Option<String>> = HashMap::new();
    for sibling in &task.subtasks {
        let block = sibling.state.lock().await;
        results.insert(sibling.id.clone(), block.result.clone());
    }
    let prompt = render_prompt(&sub.prompt, &results);

    {
        let mut block = sub.state.lock().await;
        if block.state.is_terminal() {
            return;
        }
        block.state = SubtaskState::Running;
        let now = Utc::now();
        block.started_at = Some(now);
        block.updated_at = now;
    }
    debug!(task_id = %task.id, subtask = %sub.id, agent = %sub.agent, "subtask running");

    let marker = ActiveTaskRef {
        task_id: task.id.clone(),
        subtask_id: sub.id.clone(),
    };
    let outcome = ask(
        &ctx.registry,
        ctx.ask_timeout_ms,
        &sub.agent,
        &prompt,
        None,
        Some(marker),
    )
    .await;

    match outcome {
        Ok(ask_outcome) => {
            sub.complete(SubtaskState::Done, Some(ask_outcome.response), None)
                .await;
        }
        Err(err) => {
            sub.complete(SubtaskState::Error, None, Some(err.to_string()))
                .await;
        }
    }

    recompute_task_state(&task).await;
    evict_terminal_tasks(&ctx.store).await;
}

/// Recompute the task state after a subtask transition.
pub async fn recompute_task_state(task: &TaskHandle) {
    let mut any_open = false;
    let mut all_done = true;
    let mut all_cancelled = true;
    let mut any_error = false;
    for sub in &task.subtasks {
        let state = sub.state.lock().await.state;
        match state {
            SubtaskState::Pending | SubtaskState::Running => any_open = true,
            SubtaskState::Done => all_cancelled = false,
            SubtaskState::Error => {
                any_error = true;
                all_done = false;
                all_cancelled = false;
            }
            SubtaskState::Cancelled => all_done = false,
        }
        if matches!(state, SubtaskState::Pending | SubtaskState::Running) {
            all_done = false;
            all_cancelled = false;
        }
    }

    let next = if any_open {
        TaskState::Running
    } else if all_done {
        TaskState::Done
    } else if all_cancelled {
        TaskState::Cancelled
    } else if any_error {
        TaskState::Error
    } else {
        TaskState::Running
    };

    let mut block = task.state.lock().await;
    if block.state == TaskState::Cancelled {
        return;
    }
    if block.state != next {
        block.state = next;
    }
    block.updated_at = Utc::now();
}

/// Cancel a task: wake every waiter, cancel non-terminal subtasks, and
/// ACP-cancel agents still running work for this task.
///
/// Returns the task handle and the number of subtasks transitioned to
/// `cancelled`.
///
/// # Errors
///
/// Returns [`BridgeError::NotFound`] when no task has that id.
pub async fn cancel_task(
    ctx: &SchedulerContext,
    id: &str,
) -> Result<(Arc<TaskHandle>, usize)> {
    let task = ctx.store.require(id).await?;

    {
        let mut block = task.state.lock().await;
        if block.state.is_terminal() {
            drop(block);
            return Ok((task, 0));
        }
        block.cancel_requested = true;
        block.state = TaskState::Cancelled;
        block.updated_at = Utc::now();
    }
    task.cancel.cancel();

    let mut cancelled = 0usize;
    let mut was_running: Vec<Arc<SubtaskHandle>> = Vec::new();
    for sub in &task.subtasks {
        let state = sub.state.lock().await.state;
        match state {
            SubtaskState::Pending => {
                sub.complete(SubtaskState::Cancelled, None, None).await;
                cancelled += 1;
            }
            SubtaskState::Running => {
                sub.complete(SubtaskState::Cancelled, None, None).await;
                cancelled += 1;
                was_running.push(Arc::clone(sub));
            }
            _ => {}
        }
    }

    // Best-effort agent-side cancellation for subtasks caught mid-ask.
    for sub in was_running {
        let Some(entry) = ctx.registry.get(&sub.agent).await else {
            continue;
        };
        let owned_by_us = {
            let shared = entry.shared.lock().await;
            shared
                .active_task
                .as_ref()
                .is_some_and(|marker| marker.task_id == task.id)
        };
        if !owned_by_us {
            continue;
        }
        let _ = entry.send(AgentCommand::Cancel);
        permissions::cancel_all(&entry).await;
        let mut shared = entry.shared.lock().await;
        if shared.state == AgentState::Working {
            shared.state = AgentState::Idle;
            shared.touch();
        }
    }

    evict_terminal_tasks(&ctx.store).await;
    info!(task_id = %task.id, cancelled, "task cancelled");
    Ok((task, cancelled))
}
