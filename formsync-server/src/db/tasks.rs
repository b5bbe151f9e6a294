//! Task rows

use chrono::{DateTime, Utc};
use formsync_common::models::{AssessmentVariant, CompanyId, Task, TaskId, TaskStatus};
use formsync_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let variant: String = row.get("variant");
    let status: String = row.get("status");
    let progress: i64 = row.get("progress");
    let metadata: String = row.get("metadata");
    let updated_at: String = row.get("updated_at");

    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| Error::Internal(format!("Corrupt task metadata: {}", e)))?;
    let updated_at = time::from_storage(&updated_at)
        .ok_or_else(|| Error::Internal(format!("Corrupt task timestamp: {}", updated_at)))?;

    Ok(Task {
        id: row.get("id"),
        company_id: row.get("company_id"),
        variant: variant.parse()?,
        status: status.parse()?,
        progress: progress.clamp(0, 100) as u8,
        metadata,
        updated_at,
    })
}

/// Create a new task in `not_started` state
pub async fn create_task(
    pool: &SqlitePool,
    company_id: CompanyId,
    variant: AssessmentVariant,
    metadata: serde_json::Map<String, serde_json::Value>,
) -> Result<Task> {
    let now = time::now();
    let metadata_json = serde_json::Value::Object(metadata).to_string();

    let id = sqlx::query(
        r#"
        INSERT INTO tasks (company_id, variant, status, progress, metadata, updated_at)
        VALUES (?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(variant.as_str())
    .bind(TaskStatus::NotStarted.as_str())
    .bind(&metadata_json)
    .bind(time::to_storage(&now))
    .execute(pool)
    .await?
    .last_insert_rowid();

    tracing::info!(task_id = id, company_id, variant = %variant, "Created task");

    get_task(pool, id).await
}

/// Load a task, `NotFound` if it does not exist
pub async fn get_task<'e, E>(executor: E, task_id: TaskId) -> Result<Task>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, company_id, variant, status, progress, metadata, updated_at FROM tasks WHERE id = ?",
    )
    .bind(task_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Task {} not found", task_id)))?;

    task_from_row(&row)
}

/// Store recomputed progress/status on the task row
pub async fn update_progress<'e, E>(
    executor: E,
    task_id: TaskId,
    progress: u8,
    status: TaskStatus,
    updated_at: &DateTime<Utc>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE tasks SET progress = ?, status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(progress as i64)
    .bind(status.as_str())
    .bind(time::to_storage(updated_at))
    .bind(task_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Task {} not found", task_id)));
    }

    Ok(())
}

/// Set task status directly (submission is owned by an external workflow)
pub async fn set_status(pool: &SqlitePool, task_id: TaskId, status: TaskStatus) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(time::to_storage(&time::now()))
        .bind(task_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Task {} not found", task_id)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_create_and_get_task() {
        let pool = init_memory_pool().await.unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert("title".into(), "Vendor review".into());

        let task = create_task(&pool, 12, AssessmentVariant::B, metadata)
            .await
            .unwrap();

        let loaded = get_task(&pool, task.id).await.unwrap();
        assert_eq!(loaded.company_id, 12);
        assert_eq!(loaded.variant, AssessmentVariant::B);
        assert_eq!(loaded.status, TaskStatus::NotStarted);
        assert_eq!(loaded.progress, 0);
        assert_eq!(loaded.metadata["title"], "Vendor review");
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let pool = init_memory_pool().await.unwrap();
        let result = get_task(&pool, 404).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_progress() {
        let pool = init_memory_pool().await.unwrap();
        let task = create_task(&pool, 1, AssessmentVariant::A, Default::default())
            .await
            .unwrap();

        let ts = time::now();
        update_progress(&pool, task.id, 50, TaskStatus::InProgress, &ts)
            .await
            .unwrap();

        let loaded = get_task(&pool, task.id).await.unwrap();
        assert_eq!(loaded.progress, 50);
        assert_eq!(loaded.status, TaskStatus::InProgress);
    }
}
