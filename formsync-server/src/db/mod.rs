//! Database access for formsync-server
//!
//! SQLite via sqlx. Schema is created idempotently at startup.

pub mod responses;
pub mod tasks;

use formsync_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open (or create) the database file and ensure the schema exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database with the schema applied
///
/// Single connection: every pooled connection to `sqlite::memory:` would
/// otherwise see its own empty database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create formsync tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            variant TEXT NOT NULL CHECK (variant IN ('a', 'b', 'c')),
            status TEXT NOT NULL DEFAULT 'not_started',
            progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
            metadata TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_company ON tasks(company_id)")
        .execute(pool)
        .await?;

    // At most one live record per (task_id, field_key)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_responses (
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            field_key TEXT NOT NULL CHECK (length(field_key) > 0),
            value TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (task_id, field_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (tasks, task_responses)");

    Ok(())
}
