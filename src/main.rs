#![forbid(unsafe_code)]

//! `acp-bridge` — ACP agent bridge daemon binary.
//!
//! Bootstraps configuration, starts the HTTP surface and the eviction
//! timer, and tears everything down on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use acp_bridge::agents::{registry::AgentRegistry, stop_all};
use acp_bridge::config::BridgeConfig;
use acp_bridge::http::{self, AppState};
use acp_bridge::tasks::eviction::spawn_eviction_task;
use acp_bridge::tasks::store::{TaskLimits, TaskStore};
use acp_bridge::{BridgeError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-bridge", about = "ACP agent bridge daemon", version, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    ///
    /// Optional: a missing or malformed file logs a warning and the
    /// daemon starts with defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("acp-bridge daemon bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| BridgeError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = BridgeConfig::load(args.config.as_deref());
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = Arc::new(config);
    info!(host = %config.host, port = config.port, "configuration loaded");

    // ── Build shared application state ──────────────────
    let agents = AgentRegistry::new();
    let tasks = TaskStore::new(TaskLimits {
        max_completed: config.max_completed_tasks,
        ttl_ms: config.task_ttl_ms,
    });
    let state = Arc::new(AppState::new(Arc::clone(&config), agents, tasks));

    // ── Start background services ───────────────────────
    let ct = CancellationToken::new();
    let eviction_handle = spawn_eviction_task(state.tasks.clone(), ct.clone());

    let server_state = Arc::clone(&state);
    let server_ct = ct.clone();
    let mut server_handle =
        tokio::spawn(async move { http::serve(server_state, server_ct).await });

    info!("acp-bridge ready");

    // ── Wait for shutdown or server failure ─────────────
    tokio::select! {
        result = &mut server_handle => {
            ct.cancel();
            let _ = eviction_handle.await;
            let outcome = result
                .map_err(|err| BridgeError::Internal(format!("server task panicked: {err}")))?;
            if let Err(ref err) = outcome {
                error!(%err, "HTTP server failed");
            }
            return outcome;
        }
        () = shutdown_signal() => {
            info!("shutdown signal received — starting graceful shutdown");
            ct.cancel();
        }
    }

    // Spawn a background listener for a second signal (force-exit).
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    // ── Graceful shutdown with timeout ───────────────────
    let shutdown = async {
        stop_all(&state.agents).await;
        let _ = server_handle.await;
        let _ = eviction_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }

    info!("acp-bridge shut down");
    Ok(())
}

/// Maximum time to wait for graceful shutdown before giving up.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| BridgeError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| BridgeError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
