//! JSON request handlers for the HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::agents::{ask, cancel_agent as agents_cancel, permissions, start_agent, stop_agent};
use crate::diagnostics;
use crate::errors::{BridgeError, Result};
use crate::models::agent::{AgentStatus, CreateAgentRequest};
use crate::models::task::{CreateTaskRequest, SubtaskStatus, TaskStatus};
use crate::tasks::scheduler;

use super::{stream, AppState};

/// `GET /health`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "agents": state.agents.count().await,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

/// `GET /doctor`.
pub async fn doctor() -> Json<serde_json::Value> {
    Json(json!({ "results": diagnostics::doctor().await }))
}

/// `POST /agents`.
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<AgentStatus>)> {
    let entry = start_agent(&state.config, &state.agents, request).await?;
    Ok((StatusCode::CREATED, Json(entry.status().await)))
}

/// `GET /agents`.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentStatus>> {
    let mut statuses = Vec::new();
    for entry in state.agents.list().await {
        statuses.push(entry.status().await);
    }
    Json(statuses)
}

/// `GET /agents/{name}`.
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<AgentStatus>> {
    let entry = state.agents.require(&name).await?;
    Ok(Json(entry.status().await))
}

/// `GET /agents/{name}/diagnose`.
pub async fn diagnose_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<crate::models::agent::DiagnoseReport>> {
    let entry = state.agents.require(&name).await?;
    Ok(Json(diagnostics::diagnose(&entry).await))
}

/// Query string of `POST /agents/{name}/ask`.
#[derive(Debug, Deserialize)]
pub struct AskQuery {
    /// When true, the response is a `text/event-stream`.
    #[serde(default)]
    pub stream: bool,
}

/// Body of `POST /agents/{name}/ask`.
#[derive(Debug, Deserialize)]
pub struct AskBody {
    /// Prompt text.
    pub prompt: String,
}

/// `POST /agents/{name}/ask`.
pub async fn ask_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<AskQuery>,
    Json(body): Json<AskBody>,
) -> Response {
    if body.prompt.trim().is_empty() {
        return BridgeError::Validation("prompt is required".to_owned()).into_response();
    }

    if query.stream {
        return stream::ask_stream(state, name, body.prompt).await;
    }

    match ask::ask(
        &state.agents,
        state.config.ask_timeout_ms,
        &name,
        &body.prompt,
        None,
        None,
    )
    .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Body of approve/deny requests.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    /// Explicit option to select, when advertised.
    #[serde(default)]
    pub option_id: Option<String>,
}

/// `POST /agents/{name}/approve`.
pub async fn approve_permission(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<permissions::PermissionResolution>> {
    let entry = state.agents.require(&name).await?;
    let option_id = body.and_then(|Json(body)| body.option_id);
    Ok(Json(permissions::approve(&entry, option_id).await?))
}

/// `POST /agents/{name}/deny`.
pub async fn deny_permission(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<permissions::PermissionResolution>> {
    let entry = state.agents.require(&name).await?;
    let option_id = body.and_then(|Json(body)| body.option_id);
    Ok(Json(permissions::deny(&entry, option_id).await?))
}

/// `POST /agents/{name}/cancel`.
pub async fn cancel_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let drained = agents_cancel(&state.agents, &name).await?;
    Ok(Json(json!({
        "name": name,
        "cancelled": true,
        "permissionsCancelled": drained,
    })))
}

/// `DELETE /agents/{name}`.
pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    stop_agent(&state.agents, &name).await?;
    Ok(Json(json!({ "name": name, "state": "stopped" })))
}

/// `POST /tasks`.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskStatus>)> {
    let task = scheduler::create_task(&state.scheduler(), request).await?;
    Ok((StatusCode::CREATED, Json(task.status().await)))
}

/// `GET /tasks`.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskStatus>> {
    let mut statuses = Vec::new();
    for task in state.tasks.list().await {
        statuses.push(task.status().await);
    }
    Json(statuses)
}

/// `GET /tasks/{id}`.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatus>> {
    let task = state.tasks.require(&id).await?;
    Ok(Json(task.status().await))
}

/// `GET /tasks/{id}/subtasks/{subtask_id}`.
pub async fn get_subtask(
    State(state): State<Arc<AppState>>,
    Path((id, subtask_id)): Path<(String, String)>,
) -> Result<Json<SubtaskStatus>> {
    let task = state.tasks.require(&id).await?;
    let sub = task.subtask(&subtask_id).ok_or_else(|| {
        BridgeError::NotFound(format!("subtask '{subtask_id}' not found in task '{id}'"))
    })?;
    Ok(Json(sub.status().await))
}

/// `DELETE /tasks/{id}`.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let (task, cancelled) = scheduler::cancel_task(&state.scheduler(), &id).await?;
    let mut value = serde_json::to_value(task.status().await)?;
    value["subtasksCancelled"] = json!(cancelled);
    Ok(Json(value))
}
