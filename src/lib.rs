#![forbid(unsafe_code)]

//! ACP Bridge — a long-lived local daemon fronting externally-installed
//! coding agents (OpenCode, Codex, Claude, Gemini) behind one stable HTTP
//! surface.
//!
//! Each agent speaks the Agent Client Protocol over its stdio; the bridge
//! multiplexes those conversations, tracks per-agent lifecycle state,
//! parks permission callbacks for HTTP resolution, and schedules
//! multi-agent task graphs.

pub mod agents;
pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod http;
pub mod models;
pub mod preflight;
pub mod probe;
pub mod tasks;

pub use errors::{BridgeError, Result};
