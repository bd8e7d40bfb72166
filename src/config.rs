//! Bridge configuration: JSON file, environment overrides, defaults.
//!
//! The file is read once at startup and immutable thereafter. A malformed
//! file logs a structured warning and is treated as empty — the daemon
//! still starts with defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 7800;
/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default ask wall-clock timeout in milliseconds.
pub const DEFAULT_ASK_TIMEOUT_MS: u64 = 300_000;
/// Default cap on retained terminal tasks.
pub const DEFAULT_MAX_COMPLETED_TASKS: usize = 100;
/// Default terminal-task TTL in milliseconds.
pub const DEFAULT_TASK_TTL_MS: u64 = 3_600_000;

/// Per-type launch overrides from the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AgentOverride {
    /// Explicit command replacing the built-in candidate list.
    pub command: Option<String>,
    /// Arguments for the explicit command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Raw shape of the JSON configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    port: Option<u16>,
    host: Option<String>,
    #[serde(default)]
    agents: HashMap<String, AgentOverride>,
}

/// Resolved bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Ask wall-clock timeout.
    pub ask_timeout_ms: u64,
    /// Cap on retained terminal tasks.
    pub max_completed_tasks: usize,
    /// Terminal-task TTL.
    pub task_ttl_ms: u64,
    /// Per-type launch overrides keyed by agent type string.
    pub agents: HashMap<String, AgentOverride>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            ask_timeout_ms: DEFAULT_ASK_TIMEOUT_MS,
            max_completed_tasks: DEFAULT_MAX_COMPLETED_TASKS,
            task_ttl_ms: DEFAULT_TASK_TTL_MS,
            agents: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration: file (optional), then `ACP_BRIDGE_*` environment
    /// overrides on top.
    ///
    /// A missing or malformed file is not fatal; it logs a warning and
    /// yields defaults.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = path.map_or_else(Self::default, Self::from_file);
        config.apply_env();
        config
    }

    /// Parse the JSON configuration file, tolerating absence and damage.
    fn from_file(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), %err, "config file unreadable; using defaults");
                return Self::default();
            }
        };

        let file: ConfigFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "config file malformed; using defaults");
                ConfigFile::default()
            }
        };

        let mut agents = file.agents;
        for over in agents.values_mut() {
            if let Some(command) = over.command.take() {
                over.command = Some(expand_tilde(&command));
            }
        }

        Self {
            host: file.host.unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: file.port.unwrap_or(DEFAULT_PORT),
            agents,
            ..Self::default()
        }
    }

    /// Apply `ACP_BRIDGE_*` process environment overrides.
    fn apply_env(&mut self) {
        if let Some(port) = env_parse::<u16>("ACP_BRIDGE_PORT") {
            self.port = port;
        }
        if let Ok(host) = std::env::var("ACP_BRIDGE_HOST") {
            if !host.trim().is_empty() {
                self.host = host;
            }
        }
        if let Some(timeout) = env_parse::<u64>("ACP_BRIDGE_ASK_TIMEOUT_MS") {
            self.ask_timeout_ms = timeout;
        }
        if let Some(max) = env_parse::<usize>("ACP_BRIDGE_MAX_TASKS") {
            self.max_completed_tasks = max;
        }
        if let Some(ttl) = env_parse::<u64>("ACP_BRIDGE_TASK_TTL_MS") {
            self.task_ttl_ms = ttl;
        }
    }

    /// Launch override for an agent type, when configured.
    #[must_use]
    pub fn agent_override(&self, kind: &str) -> Option<&AgentOverride> {
        self.agents.get(kind)
    }
}

/// Parse an environment variable, logging when it is set but invalid.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

/// Expand a leading `~/` against the user's home directory.
///
/// Paths without a tilde prefix pass through unchanged, as does a tilde
/// path when no home directory can be determined.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    let Some(rest) = path.strip_prefix("~/") else {
        return path.to_owned();
    };
    dirs::home_dir().map_or_else(
        || path.to_owned(),
        |home| home.join(rest).to_string_lossy().into_owned(),
    )
}

/// Expand a tilde path into a `PathBuf`.
#[must_use]
pub fn expand_tilde_path(path: &str) -> PathBuf {
    PathBuf::from(expand_tilde(path))
}
