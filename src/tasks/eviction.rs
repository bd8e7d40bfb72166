//! Terminal-task eviction.
//!
//! Runs on every terminal transition and on a periodic timer: first drops
//! every terminal task older than the TTL, then trims the oldest terminal
//! tasks down to the capacity cap. Running tasks are never evicted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::store::{TaskHandle, TaskStore};

/// Interval between periodic eviction sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run one eviction sweep. Returns the number of tasks dropped.
pub async fn evict_terminal_tasks(store: &TaskStore) -> usize {
    let limits = store.limits();
    let now = Utc::now();

    // Snapshot terminal tasks with their last-mutation timestamps.
    let mut terminal: Vec<(Arc<TaskHandle>, DateTime<Utc>)> = Vec::new();
    for task in store.list().await {
        let block = task.state.lock().await;
        if block.state.is_terminal() {
            let updated_at = block.updated_at;
            drop(block);
            terminal.push((task, updated_at));
        }
    }

    let ttl = chrono::Duration::milliseconds(i64::try_from(limits.ttl_ms).unwrap_or(i64::MAX));
    let mut expired: Vec<String> = Vec::new();
    terminal.retain(|(task, updated_at)| {
        if now.signed_duration_since(*updated_at) > ttl {
            expired.push(task.id.clone());
            false
        } else {
            true
        }
    });

    // Oldest-first beyond the capacity cap.
    terminal.sort_by(|a, b| a.1.cmp(&b.1));
    let over = terminal.len().saturating_sub(limits.max_completed);
    for (task, _) in terminal.into_iter().take(over) {
        expired.push(task.id.clone());
    }

    let dropped = expired.len();
    store.remove_batch(&expired).await;
    if dropped > 0 {
        info!(dropped, "evicted terminal tasks");
    }
    dropped
}

/// Spawn the periodic eviction sweep.
///
/// Runs every [`SWEEP_INTERVAL`] until the token fires.
#[must_use]
pub fn spawn_eviction_task(store: TaskStore, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // The immediate first tick would sweep an empty store.
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("eviction task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    evict_terminal_tasks(&store).await;
                }
            }
        }
    })
}
