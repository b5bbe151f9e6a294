//! Task response records
//!
//! One row per `(task_id, field_key)`. Values are stored as JSON text.
//! Writing a value identical to the stored one leaves the row untouched, so
//! `version` only moves when the answer actually changes.

use chrono::{DateTime, Utc};
use formsync_common::models::{ResponseRecord, Responses, TaskId};
use formsync_common::{time, Error, Result};
use serde_json::Value;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};

use crate::utils::db_retry::retry_on_lock;

/// Outcome of writing a set of responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Fields accepted by the write
    pub written: usize,
    /// Fields whose stored value actually changed
    pub changed: usize,
}

fn decode_value(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::Internal(format!("Corrupt response value: {}", e)))
}

/// Canonical response map for a task
pub async fn load_responses<'e, E>(executor: E, task_id: TaskId) -> Result<Responses>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT field_key, value FROM task_responses WHERE task_id = ?")
        .bind(task_id)
        .fetch_all(executor)
        .await?;

    let mut responses = Responses::new();
    for row in rows {
        let key: String = row.get("field_key");
        let raw: String = row.get("value");
        responses.insert(key, decode_value(&raw)?);
    }
    Ok(responses)
}

/// Full records (with versions) for a task, ordered by key
pub async fn load_records(pool: &SqlitePool, task_id: TaskId) -> Result<Vec<ResponseRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT task_id, field_key, value, version, updated_at
        FROM task_responses
        WHERE task_id = ?
        ORDER BY field_key
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let raw: String = row.get("value");
            let updated_at: String = row.get("updated_at");
            Ok(ResponseRecord {
                task_id: row.get("task_id"),
                field_key: row.get("field_key"),
                value: decode_value(&raw)?,
                version: row.get("version"),
                updated_at: time::from_storage(&updated_at).ok_or_else(|| {
                    Error::Internal(format!("Corrupt response timestamp: {}", updated_at))
                })?,
            })
        })
        .collect()
}

/// Insert or update one field; returns whether the stored row changed
pub async fn upsert_value(
    conn: &mut SqliteConnection,
    task_id: TaskId,
    field_key: &str,
    value: &Value,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO task_responses (task_id, field_key, value, version, updated_at)
        VALUES (?, ?, ?, 1, ?)
        ON CONFLICT(task_id, field_key) DO UPDATE SET
            value = excluded.value,
            version = task_responses.version + 1,
            updated_at = excluded.updated_at
        WHERE task_responses.value IS NOT excluded.value
        "#,
    )
    .bind(task_id)
    .bind(field_key)
    .bind(value.to_string())
    .bind(time::to_storage(now))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Remove one field; returns whether a row existed
pub async fn delete_value(
    conn: &mut SqliteConnection,
    task_id: TaskId,
    field_key: &str,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM task_responses WHERE task_id = ? AND field_key = ?")
        .bind(task_id)
        .bind(field_key)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

async fn upsert_once(pool: &SqlitePool, task_id: TaskId, responses: &Responses) -> Result<UpsertSummary> {
    let now = time::now();
    let mut tx = pool.begin().await?;

    let mut summary = UpsertSummary::default();
    for (key, value) in responses {
        if upsert_value(&mut *tx, task_id, key, value, &now).await? {
            summary.changed += 1;
        }
        summary.written += 1;
    }

    tx.commit().await?;
    Ok(summary)
}

/// Write a canonical response map in one transaction
pub async fn upsert_responses(
    pool: &SqlitePool,
    task_id: TaskId,
    responses: &Responses,
    max_lock_wait_ms: u64,
) -> Result<UpsertSummary> {
    if responses.is_empty() {
        return Ok(UpsertSummary::default());
    }

    let summary = retry_on_lock("upsert responses", max_lock_wait_ms, || {
        upsert_once(pool, task_id, responses)
    })
    .await?;

    tracing::debug!(
        task_id,
        written = summary.written,
        changed = summary.changed,
        "Upserted responses"
    );

    Ok(summary)
}

/// Remove one field outside a transaction, retrying on lock contention
pub async fn clear_field(
    pool: &SqlitePool,
    task_id: TaskId,
    field_key: &str,
    max_lock_wait_ms: u64,
) -> Result<bool> {
    retry_on_lock("clear field", max_lock_wait_ms, || async {
        let mut conn = pool.acquire().await?;
        delete_value(&mut conn, task_id, field_key).await
    })
    .await
}

/// Delete every response of a task
pub async fn delete_all(conn: &mut SqliteConnection, task_id: TaskId) -> Result<u64> {
    let result = sqlx::query("DELETE FROM task_responses WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Plain insert of a replacement record set; duplicates and empty keys fail
pub async fn insert_all(
    conn: &mut SqliteConnection,
    task_id: TaskId,
    records: &[(String, Value)],
    now: &DateTime<Utc>,
) -> Result<usize> {
    let ts = time::to_storage(now);
    for (key, value) in records {
        sqlx::query(
            r#"
            INSERT INTO task_responses (task_id, field_key, value, version, updated_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(task_id)
        .bind(key)
        .bind(value.to_string())
        .bind(&ts)
        .execute(&mut *conn)
        .await?;
    }
    Ok(records.len())
}
