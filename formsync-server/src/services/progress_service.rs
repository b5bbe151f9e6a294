//! Progress recomputation and the authoritative progress snapshot
//!
//! Every write path ends here: responses are reloaded, the Progress
//! Calculator runs against the task's catalog and the cached progress and
//! status are stored back on the task row.

use formsync_common::models::{ProgressSnapshot, Task, TaskId, TaskStatus};
use formsync_common::{progress, time, BroadcastEvent, Result};
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::{responses, tasks};
use crate::utils::db_retry::retry_on_lock;
use crate::AppState;

/// Snapshot of the cached progress on a task row
pub fn snapshot(state: &AppState, task: &Task) -> ProgressSnapshot {
    ProgressSnapshot {
        task_id: task.id,
        progress: task.progress,
        status: task.status,
        bulk_in_progress: state.bulk_gate.is_active(task.id),
        timestamp: task.updated_at,
    }
}

async fn recompute_once(
    pool: &SqlitePool,
    catalogs: &formsync_common::CatalogSet,
    task_id: TaskId,
) -> Result<Task> {
    let mut tx = pool.begin().await?;

    let mut task = tasks::get_task(&mut *tx, task_id).await?;
    let current = responses::load_responses(&mut *tx, task_id).await?;

    let catalog = catalogs.get(task.variant);
    let progress = progress::calculate(&current, catalog);
    let status = TaskStatus::derive(task.status, progress);
    let updated_at = time::next_after(&task.updated_at);

    tasks::update_progress(&mut *tx, task_id, progress, status, &updated_at).await?;
    tx.commit().await?;

    if task.progress != progress || task.status != status {
        debug!(
            task_id,
            from = task.progress,
            to = progress,
            status = %status,
            "Task progress changed"
        );
    }

    task.progress = progress;
    task.status = status;
    task.updated_at = updated_at;
    Ok(task)
}

/// Recompute and store progress without notifying observers
pub async fn recompute(state: &AppState, task_id: TaskId) -> Result<(Task, ProgressSnapshot)> {
    let task = retry_on_lock("recompute progress", state.max_lock_wait_ms, || {
        recompute_once(&state.db, &state.catalogs, task_id)
    })
    .await?;

    let snapshot = snapshot(state, &task);
    Ok((task, snapshot))
}

/// Recompute, store and broadcast exactly one `task_updated` event
pub async fn recompute_and_broadcast(state: &AppState, task_id: TaskId) -> Result<ProgressSnapshot> {
    let (task, snapshot) = recompute(state, task_id).await?;
    state
        .broadcaster
        .publish(task.company_id, BroadcastEvent::task_updated(task.id));
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::sse::Scope;
    use formsync_common::models::{AssessmentVariant, Responses};
    use formsync_common::CatalogSet;
    use serde_json::json;

    async fn state_with_task(variant: AssessmentVariant) -> (AppState, Task) {
        let pool = init_memory_pool().await.unwrap();
        let task = tasks::create_task(&pool, 1, variant, Default::default())
            .await
            .unwrap();
        (AppState::new(pool, CatalogSet::builtin()), task)
    }

    #[tokio::test]
    async fn test_recompute_updates_task_row() {
        let (state, task) = state_with_task(AssessmentVariant::C).await;
        let mut input = Responses::new();
        input.insert("api_standard_version".into(), json!("v2"));
        input.insert("consent_management".into(), json!("central"));
        responses::upsert_responses(&state.db, task.id, &input, 1000)
            .await
            .unwrap();

        let (_, snapshot) = recompute(&state, task.id).await.unwrap();
        assert_eq!(snapshot.progress, 50);
        assert_eq!(snapshot.status, TaskStatus::InProgress);

        let stored = tasks::get_task(&state.db, task.id).await.unwrap();
        assert_eq!(stored.progress, 50);
        assert_eq!(stored.updated_at, snapshot.timestamp);
    }

    #[tokio::test]
    async fn test_snapshot_timestamps_increase() {
        let (state, task) = state_with_task(AssessmentVariant::A).await;
        let (_, first) = recompute(&state, task.id).await.unwrap();
        let (_, second) = recompute(&state, task.id).await.unwrap();
        assert!(second.timestamp > first.timestamp);
    }

    #[tokio::test]
    async fn test_submitted_task_stays_submitted() {
        let (state, task) = state_with_task(AssessmentVariant::A).await;
        tasks::set_status(&state.db, task.id, TaskStatus::Submitted)
            .await
            .unwrap();

        let (_, snapshot) = recompute(&state, task.id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Submitted);
        assert_eq!(snapshot.progress, 0);
    }

    #[tokio::test]
    async fn test_broadcast_once_per_recompute() {
        let (state, task) = state_with_task(AssessmentVariant::B).await;
        let mut rx = state.broadcaster.subscribe(Scope::Task(task.id));

        recompute_and_broadcast(&state, task.id).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().task_id, task.id);
        assert!(rx.try_recv().is_err());
    }
}
