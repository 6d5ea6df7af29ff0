//! Schema creation and database reset.
//!
//! `run_migrations` is idempotent and runs on `anno init` and whenever a
//! [`Store`](crate::store::Store) is opened. `reset_database` backs up the
//! current file and recreates an empty schema, for when an old database no
//! longer matches the current layout.

use sqlx::SqlitePool;
use std::path::PathBuf;

use crate::config::Config;
use crate::db;
use crate::error::{AppError, AppResult};

pub async fn run_migrations(config: &Config) -> AppResult<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> AppResult<()> {
    // Create tasks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            config TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'created',
            created_at INTEGER NOT NULL,
            data_path TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create annotations table; one row per (task, record index)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS annotations (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            data_index INTEGER NOT NULL,
            result TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            annotator_id TEXT NOT NULL DEFAULT 'user1',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(task_id, data_index),
            FOREIGN KEY (task_id) REFERENCES tasks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'annotator',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_annotations_task_id ON annotations(task_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Backs up the database file (if any), deletes it, and recreates the schema.
///
/// Returns the backup path when there was a database to back up.
pub async fn reset_database(config: &Config) -> AppResult<Option<PathBuf>> {
    let db_path = &config.db.path;
    let mut backup = None;

    if db_path.exists() {
        // Fold the WAL into the main file so the copy is complete.
        let pool = db::connect(config).await?;
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&pool)
            .await?;
        pool.close().await;

        let backup_path = backup_path_for(db_path);
        std::fs::copy(db_path, &backup_path).map_err(|e| AppError::io(&backup_path, e))?;
        tracing::info!(backup = %backup_path.display(), "database backed up");

        std::fs::remove_file(db_path).map_err(|e| AppError::io(db_path, e))?;
        for suffix in ["-wal", "-shm"] {
            let side = PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if side.exists() {
                std::fs::remove_file(&side).map_err(|e| AppError::io(&side, e))?;
            }
        }
        backup = Some(backup_path);
    }

    run_migrations(config).await?;
    Ok(backup)
}

fn backup_path_for(db_path: &std::path::Path) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "database".to_string());
    let ext = db_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    db_path.with_file_name(format!("{}_backup_{}{}", stem, ts, ext))
}
