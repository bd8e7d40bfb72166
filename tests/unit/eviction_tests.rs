//! Unit tests for terminal-task eviction.

use std::sync::Arc;

use chrono::{Duration, Utc};

use acp_bridge::models::task::TaskState;
use acp_bridge::tasks::eviction::evict_terminal_tasks;
use acp_bridge::tasks::store::{SubtaskHandle, TaskHandle, TaskLimits, TaskStore};

fn task(id: &str) -> Arc<TaskHandle> {
    let sub = Arc::new(SubtaskHandle::new(
        "subtask-1".to_owned(),
        "agent".to_owned(),
        "prompt".to_owned(),
        vec![],
    ));
    Arc::new(TaskHandle::new(id.to_owned(), id.to_owned(), vec![sub]))
}

async fn finish(handle: &TaskHandle, state: TaskState, age_ms: i64) {
    let mut block = handle.state.lock().await;
    block.state = state;
    block.updated_at = Utc::now() - Duration::milliseconds(age_ms);
}

#[tokio::test]
async fn running_tasks_are_never_evicted() {
    let store = TaskStore::new(TaskLimits {
        max_completed: 0,
        ttl_ms: 0,
    });
    store.insert(task("running")).await;

    assert_eq!(evict_terminal_tasks(&store).await, 0);
    assert_eq!(store.count().await, 1);
}

#[tokio::test]
async fn terminal_tasks_older_than_ttl_are_dropped() {
    let store = TaskStore::new(TaskLimits {
        max_completed: 100,
        ttl_ms: 1_000,
    });

    let old = task("old");
    finish(&old, TaskState::Done, 5_000).await;
    store.insert(old).await;

    let fresh = task("fresh");
    finish(&fresh, TaskState::Done, 0).await;
    store.insert(fresh).await;

    assert_eq!(evict_terminal_tasks(&store).await, 1);
    assert!(store.get("old").await.is_none());
    assert!(store.get("fresh").await.is_some());
}

#[tokio::test]
async fn capacity_cap_drops_the_oldest_terminal_tasks() {
    let store = TaskStore::new(TaskLimits {
        max_completed: 2,
        ttl_ms: 3_600_000,
    });

    for (id, age) in [("t1", 3_000), ("t2", 2_000), ("t3", 1_000), ("t4", 0)] {
        let handle = task(id);
        finish(&handle, TaskState::Done, age).await;
        store.insert(handle).await;
    }

    assert_eq!(evict_terminal_tasks(&store).await, 2);
    assert!(store.get("t1").await.is_none(), "oldest dropped first");
    assert!(store.get("t2").await.is_none());
    assert!(store.get("t3").await.is_some());
    assert!(store.get("t4").await.is_some());
}

#[tokio::test]
async fn cancelled_and_errored_tasks_count_as_terminal() {
    let store = TaskStore::new(TaskLimits {
        max_completed: 0,
        ttl_ms: 3_600_000,
    });

    let cancelled = task("cancelled");
    finish(&cancelled, TaskState::Cancelled, 100).await;
    store.insert(cancelled).await;

    let errored = task("errored");
    finish(&errored, TaskState::Error, 50).await;
    store.insert(errored).await;

    assert_eq!(evict_terminal_tasks(&store).await, 2);
    assert_eq!(store.count().await, 0);
}

#[tokio::test]
async fn sweep_is_a_no_op_within_limits() {
    let store = TaskStore::new(TaskLimits {
        max_completed: 10,
        ttl_ms: 3_600_000,
    });
    let done = task("done");
    finish(&done, TaskState::Done, 10).await;
    store.insert(done).await;

    assert_eq!(evict_terminal_tasks(&store).await, 0);
    assert_eq!(store.count().await, 1);
}
