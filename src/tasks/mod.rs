//! Task DAG scheduling: store, validation and execution, prompt
//! templating, and terminal-task eviction.

pub mod eviction;
pub mod scheduler;
pub mod store;
pub mod template;
