//! Atomic Bulk Populator
//!
//! Replaces a task's entire response set (clear or demo populate) inside one
//! transaction. Either every row changes or none does. Progress is recomputed
//! and broadcast exactly once after commit.

use chrono::Utc;
use formsync_common::models::{ProgressSnapshot, TaskId};
use formsync_common::{time, Error, Result, Task};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::responses;
use crate::services::progress_service;
use crate::utils::db_retry::retry_on_lock;
use crate::AppState;

/// What a bulk operation does to the response set
#[derive(Debug, Clone, PartialEq)]
pub enum BulkMode {
    /// Delete every response
    Clear,
    /// Delete every response, then insert these records
    Populate(Vec<(String, Value)>),
}

impl BulkMode {
    fn label(&self) -> &'static str {
        match self {
            BulkMode::Clear => "clear",
            BulkMode::Populate(_) => "populate",
        }
    }

    fn records(&self) -> &[(String, Value)] {
        match self {
            BulkMode::Clear => &[],
            BulkMode::Populate(records) => records,
        }
    }
}

/// Result of a committed bulk operation
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome {
    pub removed: u64,
    pub inserted: usize,
    pub snapshot: ProgressSnapshot,
}

async fn replace_once(pool: &SqlitePool, task_id: TaskId, mode: &BulkMode) -> Result<(u64, usize)> {
    let mut tx = pool.begin().await?;

    let removed = responses::delete_all(&mut *tx, task_id).await?;
    let inserted = responses::insert_all(&mut *tx, task_id, mode.records(), &Utc::now()).await?;

    tx.commit().await?;
    Ok((removed, inserted))
}

/// Run a bulk operation on `task`
///
/// The task's bulk gate is held for the transaction and released after the
/// settle delay on success, or immediately on failure. Any storage error is
/// surfaced as [`Error::Persistence`] with the previous record set intact.
pub async fn run(state: &AppState, task: &Task, mode: BulkMode) -> Result<BulkOutcome> {
    let guard = state.bulk_gate.acquire(task.id);
    let started = time::now();

    let (removed, inserted) = retry_on_lock("bulk replace", state.max_lock_wait_ms, || {
        replace_once(&state.db, task.id, &mode)
    })
    .await
    .map_err(|e| {
        warn!(task_id = task.id, mode = mode.label(), "Bulk operation rolled back: {}", e);
        Error::Persistence(format!("Bulk {} of task {} rolled back: {}", mode.label(), task.id, e))
    })?;

    let snapshot = progress_service::recompute_and_broadcast(state, task.id).await?;
    guard.release_after_settle();

    info!(
        task_id = task.id,
        mode = mode.label(),
        removed,
        inserted,
        progress = snapshot.progress,
        elapsed_ms = (time::now() - started).num_milliseconds(),
        "Bulk operation committed"
    );

    Ok(BulkOutcome {
        removed,
        inserted,
        snapshot,
    })
}
