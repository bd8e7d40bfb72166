//! Agent lifecycle: preflight-gated startup, registry insertion, stop,
//! and direct cancellation.

pub mod ask;
pub mod client;
pub mod permissions;
pub mod registry;
pub mod supervisor;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{expand_tilde_path, BridgeConfig};
use crate::errors::{BridgeError, Result};
use crate::models::agent::{AgentKind, AgentState, CreateAgentRequest};
use crate::preflight::preflight;

use registry::{AgentEntry, AgentRegistry, AgentShared};
use supervisor::{spawn_agent, AgentCommand, SpawnSpec};

/// Create, preflight, spawn, and register a new agent.
///
/// The child is spawned only after the preflight gate passes; the entry is
/// registered only after the ACP handshake completes. A duplicate name
/// detected at insert time tears the fresh agent down again.
///
/// # Errors
///
/// - [`BridgeError::Validation`] — empty or duplicate name, bad cwd.
/// - [`BridgeError::Preflight`] — binary/credential/endpoint gate failed.
/// - [`BridgeError::Spawn`] — every launch candidate failed.
pub async fn start_agent(
    config: &BridgeConfig,
    registry: &AgentRegistry,
    request: CreateAgentRequest,
) -> Result<Arc<AgentEntry>> {
    let name = request.name.trim().to_owned();
    if name.is_empty() {
        return Err(BridgeError::Validation("agent name is required".to_owned()));
    }
    if registry.get(&name).await.is_some() {
        return Err(BridgeError::Validation(format!(
            "agent '{name}' already exists"
        )));
    }

    let kind = request.kind.unwrap_or(AgentKind::Opencode);
    let cwd = resolve_cwd(request.cwd.as_deref())?;

    // Config-file overrides for this type, with request fields winning.
    let over = config.agent_override(kind.as_str());
    let mut env: HashMap<String, String> = over.map(|o| o.env.clone()).unwrap_or_default();
    env.extend(request.env);
    let command = request
        .command
        .or_else(|| over.and_then(|o| o.command.clone()));
    let args = request
        .args
        .or_else(|| over.map(|o| o.args.clone()))
        .unwrap_or_default();

    preflight(&kind, &env).await?;

    let shared = Arc::new(tokio::sync::Mutex::new(AgentShared::new()));
    let spec = SpawnSpec {
        name: name.clone(),
        kind: kind.clone(),
        cwd: cwd.clone(),
        command,
        args,
        env: env.clone(),
    };
    let (handshake, cmd_tx) = spawn_agent(spec, Arc::clone(&shared)).await?;

    {
        let mut state = shared.lock().await;
        state.state = AgentState::Idle;
        if let Some(warning) = handshake.protocol_warning {
            state.last_error = Some(warning);
        }
        state.touch();
    }

    let entry = Arc::new(AgentEntry::new(
        name.clone(),
        kind,
        cwd,
        handshake.session_id,
        handshake.protocol_version,
        handshake.pid,
        env,
        shared,
        cmd_tx,
    ));

    if let Err(err) = registry.insert(Arc::clone(&entry)).await {
        // Lost a creation race: tear the fresh agent down again.
        let _ = entry.send(AgentCommand::Shutdown);
        return Err(err);
    }

    info!(agent = %name, "agent registered");
    Ok(entry)
}

/// Stop and deregister an agent: cancel its pending permissions and ask
/// the supervisor to terminate the child.
///
/// # Errors
///
/// Returns [`BridgeError::NotFound`] when no agent has that name.
pub async fn stop_agent(registry: &AgentRegistry, name: &str) -> Result<Arc<AgentEntry>> {
    let entry = registry
        .remove(name)
        .await
        .ok_or_else(|| BridgeError::NotFound(format!("agent '{name}' not found")))?;

    permissions::cancel_all(&entry).await;
    let _ = entry.send(AgentCommand::Shutdown);
    info!(agent = %name, "agent stopped and deregistered");
    Ok(entry)
}

/// Issue an ACP cancel for the in-flight turn and drain the permission
/// queue. Best-effort; never waits for the agent to acknowledge.
///
/// Returns the number of permissions cancelled.
///
/// # Errors
///
/// Returns [`BridgeError::NotFound`] when no agent has that name.
pub async fn cancel_agent(registry: &AgentRegistry, name: &str) -> Result<usize> {
    let entry = registry.require(name).await?;
    let _ = entry.send(AgentCommand::Cancel);
    Ok(permissions::cancel_all(&entry).await)
}

/// Stop every registered agent (daemon shutdown path).
pub async fn stop_all(registry: &AgentRegistry) {
    for entry in registry.list().await {
        let _ = stop_agent(registry, &entry.name).await;
    }
}

fn resolve_cwd(requested: Option<&str>) -> Result<PathBuf> {
    match requested {
        Some(raw) => {
            let path = expand_tilde_path(raw);
            path.canonicalize().map_err(|err| {
                BridgeError::Validation(format!("invalid cwd '{raw}': {err}"))
            })
        }
        None => std::env::current_dir()
            .map_err(|err| BridgeError::Internal(format!("cannot determine cwd: {err}"))),
    }
}
