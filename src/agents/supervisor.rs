//! ACP connection supervisor.
//!
//! One supervisor per agent: it owns the child process and the ACP
//! connection, performs the handshake, fans stream notifications into the
//! shared record via [`BridgeClient`], and services prompt/cancel/shutdown
//! commands until the child exits.
//!
//! The ACP connection type is `!Send`, so each supervisor runs on a
//! dedicated OS thread with a current-thread runtime and a `LocalSet`.
//! The rest of the daemon talks to it exclusively through the command
//! channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use agent_client_protocol::{
    Agent as _, CancelNotification, ClientSideConnection, ContentBlock, Implementation,
    InitializeRequest, NewSessionRequest, PromptRequest, ProtocolVersion, SessionId, StopReason,
    TextContent,
};
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::LocalSet;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::expand_tilde;
use crate::errors::{BridgeError, Result};
use crate::models::agent::AgentKind;
use crate::preflight::launch_candidates;

use super::client::BridgeClient;
use super::registry::AgentShared;

/// Budget for the initialize + new-session handshake per candidate.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between SIGTERM and SIGKILL on teardown.
const TERMINATION_GRACE: Duration = Duration::from_secs(3);

/// Result of a completed prompt turn, crossing the thread boundary.
#[derive(Debug, Clone)]
pub struct PromptOutcome {
    /// Terminal reason reported by the agent.
    pub stop_reason: Option<String>,
}

/// Commands serviced by the supervisor loop.
#[derive(Debug)]
pub enum AgentCommand {
    /// Dispatch a prompt turn; the reply carries the outcome or the raw
    /// error string.
    Prompt {
        /// Prompt text.
        text: String,
        /// One-shot reply channel.
        reply: oneshot::Sender<std::result::Result<PromptOutcome, String>>,
    },
    /// Issue an ACP `session/cancel` for the in-flight turn.
    Cancel,
    /// Terminate the child and end the supervisor.
    Shutdown,
}

/// Everything needed to launch one agent.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Agent name (thread naming and logs).
    pub name: String,
    /// Agent kind, selecting the candidate list.
    pub kind: AgentKind,
    /// Working directory for the child.
    pub cwd: PathBuf,
    /// Explicit command override; disables the candidate list.
    pub command: Option<String>,
    /// Arguments for the explicit command.
    pub args: Vec<String>,
    /// Extra environment for the child.
    pub env: HashMap<String, String>,
}

/// Facts captured from a successful handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Opaque ACP session id.
    pub session_id: String,
    /// Negotiated protocol version, rendered as a string.
    pub protocol_version: String,
    /// Child process id.
    pub pid: Option<u32>,
    /// Set when the negotiated version is neither the library's canonical
    /// version nor the numeric `1` some adapters report.
    pub protocol_warning: Option<String>,
}

/// Spawn the supervisor thread for one agent and wait for its handshake.
///
/// Candidates are tried in order; the first successful handshake wins and
/// the supervisor enters its command loop. If every candidate fails the
/// last error is surfaced.
///
/// # Errors
///
/// Returns [`BridgeError::Spawn`] when no candidate produces a working
/// connection, or [`BridgeError::Internal`] if the thread cannot start.
pub async fn spawn_agent(
    spec: SpawnSpec,
    shared: Arc<Mutex<AgentShared>>,
) -> Result<(Handshake, mpsc::UnboundedSender<AgentCommand>)> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread_name = format!("agent-{}", spec.name);
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || supervisor_thread(spec, shared, cmd_rx, ready_tx))
        .map_err(|err| BridgeError::Internal(format!("failed to start agent thread: {err}")))?;

    match ready_rx.await {
        Ok(Ok(handshake)) => Ok((handshake, cmd_tx)),
        Ok(Err(message)) => Err(BridgeError::Spawn(message)),
        Err(_) => Err(BridgeError::Spawn(
            "agent supervisor ended before handshake".to_owned(),
        )),
    }
}

/// Thread entry: builds the current-thread runtime and drives the
/// supervisor future on a `LocalSet`.
fn supervisor_thread(
    spec: SpawnSpec,
    shared: Arc<Mutex<AgentShared>>,
    cmd_rx: mpsc::UnboundedReceiver<AgentCommand>,
    ready_tx: oneshot::Sender<std::result::Result<Handshake, String>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("failed to build agent runtime: {err}")));
            return;
        }
    };

    let local = LocalSet::new();
    local.block_on(&runtime, supervise(spec, shared, cmd_rx, ready_tx));
}

/// A booted candidate: live child plus connected session.
struct BootedAgent {
    child: Child,
    connection: Rc<ClientSideConnection>,
    session_id: String,
    protocol_version: String,
    protocol_warning: Option<String>,
}

async fn supervise(
    spec: SpawnSpec,
    shared: Arc<Mutex<AgentShared>>,
    cmd_rx: mpsc::UnboundedReceiver<AgentCommand>,
    ready_tx: oneshot::Sender<std::result::Result<Handshake, String>>,
) {
    let candidates = spec.command.clone().map_or_else(
        || launch_candidates(&spec.kind),
        |command| vec![(command, spec.args.clone())],
    );

    let mut last_error = format!("no launch candidates for agent type '{}'", spec.kind);
    for (command, args) in candidates {
        match boot_candidate(&command, &args, &spec, &shared).await {
            Ok(booted) => {
                let handshake = Handshake {
                    session_id: booted.session_id.clone(),
                    protocol_version: booted.protocol_version.clone(),
                    pid: booted.child.id(),
                    protocol_warning: booted.protocol_warning.clone(),
                };
                info!(
                    agent = %spec.name,
                    %command,
                    session_id = %booted.session_id,
                    "agent connected"
                );
                if ready_tx.send(Ok(handshake)).is_err() {
                    // Caller vanished before the handshake landed.
                    let mut child = booted.child;
                    terminate_child(&mut child).await;
                    return;
                }
                command_loop(booted, &spec.name, &shared, cmd_rx).await;
                return;
            }
            Err(err) => {
                warn!(agent = %spec.name, %command, error = %err, "launch candidate failed");
                last_error = err;
            }
        }
    }

    let _ = ready_tx.send(Err(last_error));
}

/// Spawn one candidate and complete the ACP handshake against it.
///
/// A spawn error or a child exit during the handshake kills any
/// half-started process and reports the failure, letting the caller try
/// the next candidate.
async fn boot_candidate(
    command: &str,
    args: &[String],
    spec: &SpawnSpec,
    shared: &Arc<Mutex<AgentShared>>,
) -> std::result::Result<BootedAgent, String> {
    let mut cmd = build_command(command, args, &spec.cwd, &spec.env);
    let mut child = cmd
        .spawn()
        .map_err(|err| format!("failed to spawn '{command}': {err}"))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| "failed to capture child stdin pipe".to_owned())?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture child stdout pipe".to_owned())?;
    if let Some(stderr) = child.stderr.take() {
        let stderr_shared = Arc::clone(shared);
        tokio::task::spawn_local(async move {
            let mut lines = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_shared.lock().await.push_stderr_line(&line);
            }
        });
    }

    let client = BridgeClient::new(spec.name.clone(), Arc::clone(shared));
    let (connection, io_task) =
        ClientSideConnection::new(client, stdin.compat_write(), stdout.compat(), |fut| {
            tokio::task::spawn_local(fut);
        });
    tokio::task::spawn_local(async move {
        if let Err(err) = io_task.await {
            debug!(error = %err, "ACP I/O loop terminated");
        }
    });

    let initialize = InitializeRequest::new(ProtocolVersion::LATEST).client_info(
        Implementation::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
    );
    let new_session = NewSessionRequest::new(spec.cwd.clone());

    let handshake = tokio::select! {
        result = async {
            tokio::try_join!(connection.initialize(initialize), connection.new_session(new_session))
        } => result.map_err(|err| format!("ACP handshake failed: {err}")),
        status = child.wait() => {
            let detail = status.map_or_else(
                |err| err.to_string(),
                |status| format_exit_status(&status),
            );
            let stderr = shared.lock().await.stderr_tail(5).join(" | ");
            Err(if stderr.is_empty() {
                format!("agent exited during handshake: {detail}")
            } else {
                format!("agent exited during handshake: {detail}; stderr: {stderr}")
            })
        }
        () = tokio::time::sleep(HANDSHAKE_TIMEOUT) => {
            Err(format!(
                "ACP handshake timed out after {}s",
                HANDSHAKE_TIMEOUT.as_secs()
            ))
        }
    };

    let (init_response, session_response) = match handshake {
        Ok(pair) => pair,
        Err(err) => {
            terminate_child(&mut child).await;
            return Err(err);
        }
    };

    let (protocol_version, protocol_warning) = judge_protocol(&init_response.protocol_version);

    Ok(BootedAgent {
        child,
        connection: Rc::new(connection),
        session_id: session_response.session_id.0.to_string(),
        protocol_version,
        protocol_warning,
    })
}

/// Service commands until shutdown or child exit.
async fn command_loop(
    booted: BootedAgent,
    agent_name: &str,
    shared: &Arc<Mutex<AgentShared>>,
    mut cmd_rx: mpsc::UnboundedReceiver<AgentCommand>,
) {
    let BootedAgent {
        mut child,
        connection,
        session_id,
        ..
    } = booted;

    let mut child_exited = false;
    loop {
        tokio::select! {
            status = child.wait() => {
                let detail = status.map_or_else(
                    |err| format!("exit status unknown: {err}"),
                    |status| format_exit_status(&status),
                );
                info!(agent = %agent_name, %detail, "agent process exited");
                shared.lock().await.mark_exited(Some(detail));
                child_exited = true;
                break;
            }
            command = cmd_rx.recv() => match command {
                Some(AgentCommand::Prompt { text, reply }) => {
                    let connection = Rc::clone(&connection);
                    let session = session_id.clone();
                    tokio::task::spawn_local(async move {
                        let request = PromptRequest::new(
                            SessionId::new(session),
                            vec![ContentBlock::Text(TextContent::new(text))],
                        );
                        let result = connection
                            .prompt(request)
                            .await
                            .map(|response| PromptOutcome {
                                stop_reason: Some(stop_reason_label(response.stop_reason)),
                            })
                            .map_err(|err| err.to_string());
                        let _ = reply.send(result);
                    });
                }
                Some(AgentCommand::Cancel) => {
                    let connection = Rc::clone(&connection);
                    let session = session_id.clone();
                    let name = agent_name.to_owned();
                    tokio::task::spawn_local(async move {
                        let notification = CancelNotification::new(SessionId::new(session));
                        if let Err(err) = connection.cancel(notification).await {
                            debug!(agent = %name, error = %err, "ACP cancel failed");
                        }
                    });
                }
                Some(AgentCommand::Shutdown) | None => break,
            }
        }
    }

    if !child_exited {
        terminate_child(&mut child).await;
        shared.lock().await.mark_exited(None);
        info!(agent = %agent_name, "agent stopped");
    }
}

/// Build the child command: piped stdio, shaped PATH, caller environment.
fn build_command(
    command: &str,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
) -> Command {
    let mut cmd = Command::new(expand_tilde(command));
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.env("PATH", shaped_path());
    for (key, value) in env {
        cmd.env(key, value);
    }

    cmd
}

/// Child PATH with the local OpenCode bin directory prepended, so the
/// type-specific default commands resolve even when the daemon was
/// launched from a restricted shell.
fn shaped_path() -> std::ffi::OsString {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let mut parts: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        parts.push(home.join(".opencode").join("bin"));
    }
    parts.extend(std::env::split_paths(&current));
    std::env::join_paths(parts).unwrap_or(current)
}

/// Render the negotiated protocol version and flag unexpected ones.
///
/// Accepted: the library's canonical version, or the numeric `1` some
/// adapters report. Anything else is non-fatal but recorded.
fn judge_protocol(version: &ProtocolVersion) -> (String, Option<String>) {
    let value = serde_json::to_value(version).unwrap_or_default();
    let rendered = match &value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let canonical = serde_json::to_value(ProtocolVersion::LATEST).unwrap_or_default();
    let accepted = value == canonical || value == serde_json::Value::from(1);
    let warning = (!accepted).then(|| format!("protocol mismatch: {rendered}"));
    (rendered, warning)
}

/// Stable string form of an ACP stop reason.
fn stop_reason_label(reason: StopReason) -> String {
    match reason {
        StopReason::EndTurn => "end_turn".to_owned(),
        StopReason::MaxTokens => "max_tokens".to_owned(),
        StopReason::MaxTurnRequests => "max_turn_requests".to_owned(),
        StopReason::Refusal => "refusal".to_owned(),
        StopReason::Cancelled => "cancelled".to_owned(),
        _ => "unknown".to_owned(),
    }
}

/// `exit code=<code> signal=<signal>` rendering of a child exit.
fn format_exit_status(status: &std::process::ExitStatus) -> String {
    let code = status
        .code()
        .map_or_else(|| "none".to_owned(), |code| code.to_string());
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status
            .signal()
            .map_or_else(|| "none".to_owned(), |signal| signal.to_string())
    };
    #[cfg(not(unix))]
    let signal = "none".to_owned();
    format!("exit code={code} signal={signal}")
}

/// SIGTERM, bounded grace period, then SIGKILL.
async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        if let Ok(raw) = i32::try_from(pid) {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(raw),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        if tokio::time::timeout(TERMINATION_GRACE, child.wait())
            .await
            .is_ok()
        {
            return;
        }
    }

    if let Err(err) = child.kill().await {
        debug!(error = %err, "failed to kill agent child");
    }
}
