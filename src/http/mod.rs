//! HTTP surface: shared state, router, and the serve loop.

pub mod handlers;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::registry::AgentRegistry;
use crate::config::BridgeConfig;
use crate::errors::{BridgeError, Result};
use crate::tasks::scheduler::SchedulerContext;
use crate::tasks::store::TaskStore;

/// Shared application state accessible by all handlers.
#[derive(Debug)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<BridgeConfig>,
    /// Live agent registry.
    pub agents: AgentRegistry,
    /// Task registry.
    pub tasks: TaskStore,
    /// Daemon start instant, for `/health` uptime.
    pub started_at: Instant,
}

impl AppState {
    /// Assemble the shared state.
    #[must_use]
    pub fn new(config: Arc<BridgeConfig>, agents: AgentRegistry, tasks: TaskStore) -> Self {
        Self {
            config,
            agents,
            tasks,
            started_at: Instant::now(),
        }
    }

    /// Scheduler context bound to this state.
    #[must_use]
    pub fn scheduler(&self) -> SchedulerContext {
        SchedulerContext {
            store: self.tasks.clone(),
            registry: self.agents.clone(),
            ask_timeout_ms: self.config.ask_timeout_ms,
        }
    }
}

/// Build the full router.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/doctor", get(handlers::doctor))
        .route("/agents", post(handlers::create_agent).get(handlers::list_agents))
        .route("/agents/{name}", get(handlers::get_agent).delete(handlers::delete_agent))
        .route("/agents/{name}/diagnose", get(handlers::diagnose_agent))
        .route("/agents/{name}/ask", post(handlers::ask_agent))
        .route("/agents/{name}/approve", post(handlers::approve_permission))
        .route("/agents/{name}/deny", post(handlers::deny_permission))
        .route("/agents/{name}/cancel", post(handlers::cancel_agent))
        .route("/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route("/tasks/{id}", get(handlers::get_task).delete(handlers::cancel_task))
        .route(
            "/tasks/{id}/subtasks/{subtask_id}",
            get(handlers::get_subtask),
        )
        .with_state(state)
}

/// Bind and serve until the token fires.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] when the port cannot be bound (in
/// particular when it is already in use) and [`BridgeError::Internal`]
/// for server failures.
pub async fn serve(state: Arc<AppState>, cancel: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::AddrInUse {
            BridgeError::Config(format!("port {} already in use", state.config.port))
        } else {
            BridgeError::Config(format!("failed to bind {addr}: {err}"))
        }
    })?;

    info!(%addr, "HTTP surface listening");
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|err| BridgeError::Internal(format!("HTTP server error: {err}")))?;

    info!("HTTP surface shut down");
    Ok(())
}
