//! SQLite-backed data store for tasks, annotations and users.
//!
//! Every multi-statement operation runs inside one transaction; returning
//! early with an error drops the transaction, which rolls it back, so a
//! partially applied write is never visible to later reads.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create_task`](Store::create_task) | Persist a new task (status `created`) |
//! | [`get_task`](Store::get_task) | Fetch one task with its decoded config |
//! | [`list_tasks`](Store::list_tasks) | All tasks, newest first |
//! | [`save_annotation`](Store::save_annotation) | Upsert the result for (task, index) |
//! | [`get_annotation`](Store::get_annotation) | Fetch the result for (task, index) |
//! | [`list_annotations`](Store::list_annotations) | All results of a task, by index |
//! | [`get_task_progress`](Store::get_task_progress) | Completed / total / percent |

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::form;
use crate::migrate;
use crate::models::{
    Annotation, AnnotationKind, AnnotationResult, AnnotationStatus, NewTask, Task, TaskConfig,
    TaskProgress, TaskStatus, User,
};

/// Task counts by lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: u64,
    pub active: u64,
    pub completed: u64,
}

pub struct Store {
    pool: SqlitePool,
    annotator_id: String,
}

impl Store {
    /// Connects to the configured database and makes sure the schema exists.
    pub async fn open(config: &Config) -> AppResult<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool, config.annotator.id.clone()))
    }

    pub fn new(pool: SqlitePool, annotator_id: impl Into<String>) -> Self {
        Self {
            pool,
            annotator_id: annotator_id.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn annotator_id(&self) -> &str {
        &self.annotator_id
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    // ============ Tasks ============

    pub async fn create_task(&self, task: &NewTask) -> AppResult<String> {
        if task.name.trim().is_empty() {
            return Err(AppError::validation("task name must not be empty"));
        }
        if task.data_path.trim().is_empty() {
            return Err(AppError::validation("task data path must not be empty"));
        }

        let id = Uuid::new_v4().to_string();
        let config_json = serde_json::to_string(&task.config)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO tasks (id, name, description, config, status, created_at, data_path)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(task.name.trim())
        .bind(&task.description)
        .bind(&config_json)
        .bind(TaskStatus::Created.as_str())
        .bind(now)
        .bind(&task.data_path)
        .execute(&self.pool)
        .await?;

        tracing::info!(task_id = %id, name = %task.name, items = task.config.total_items, "task created");
        Ok(id)
    }

    pub async fn get_task(&self, task_id: &str) -> AppResult<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, name, description, config, status, created_at, data_path FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// Like [`get_task`](Store::get_task) but treats absence as an error.
    pub async fn require_task(&self, task_id: &str) -> AppResult<Task> {
        self.get_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("task", task_id))
    }

    pub async fn list_tasks(&self) -> AppResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, config, status, created_at, data_path
            FROM tasks
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    pub async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> AppResult<()> {
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("task", task_id));
        }
        Ok(())
    }

    /// Administrative removal of a task and all of its annotations.
    pub async fn delete_task(&self, task_id: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM annotations WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("task", task_id));
        }

        tx.commit().await?;
        tracing::info!(task_id, "task deleted");
        Ok(())
    }

    pub async fn status_counts(&self) -> AppResult<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let status: TaskStatus = row.try_get::<String, _>("status")?.parse()?;
            let n = row.try_get::<i64, _>("n")? as u64;
            counts.total += n;
            if status.is_active() {
                counts.active += n;
            } else {
                counts.completed += n;
            }
        }
        Ok(counts)
    }

    // ============ Annotations ============

    /// Records `result` for record `data_index` of a task, replacing any
    /// earlier result for that index.
    ///
    /// The result must match the task's annotation config and the index must
    /// be within the dataset. The task moves to `in_progress`, or to
    /// `completed` once every record has a result.
    pub async fn save_annotation(
        &self,
        task_id: &str,
        data_index: u64,
        result: &AnnotationResult,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let config_json: Option<String> = sqlx::query_scalar("SELECT config FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?;
        let config_json = config_json.ok_or_else(|| AppError::not_found("task", task_id))?;
        let config: TaskConfig = serde_json::from_str(&config_json)?;

        if data_index >= config.total_items {
            return Err(AppError::validation(format!(
                "record index {} is out of range (task has {} records)",
                data_index, config.total_items
            )));
        }
        form::validate_result(&config.annotation_config, result)?;

        let now = Utc::now().timestamp();
        let result_json = serde_json::to_string(&result.to_value())?;

        sqlx::query(
            r#"
            INSERT INTO annotations (id, task_id, data_index, result, status, annotator_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id, data_index) DO UPDATE SET
                result = excluded.result,
                status = excluded.status,
                annotator_id = excluded.annotator_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(task_id)
        .bind(data_index as i64)
        .bind(&result_json)
        .bind(AnnotationStatus::Done.as_str())
        .bind(&self.annotator_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT data_index) FROM annotations WHERE task_id = ? AND status = ?",
        )
        .bind(task_id)
        .bind(AnnotationStatus::Done.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let status = if TaskProgress::compute(config.total_items, completed as u64).is_complete() {
            TaskStatus::Completed
        } else {
            TaskStatus::InProgress
        };
        sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(task_id, data_index, %status, "annotation saved");
        Ok(())
    }

    pub async fn get_annotation(
        &self,
        task_id: &str,
        data_index: u64,
    ) -> AppResult<Option<Annotation>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.task_id, a.data_index, a.result, a.status, a.annotator_id,
                   a.created_at, a.updated_at, t.config
            FROM annotations a
            JOIN tasks t ON t.id = a.task_id
            WHERE a.task_id = ? AND a.data_index = ?
            "#,
        )
        .bind(task_id)
        .bind(data_index as i64)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let config: TaskConfig = serde_json::from_str(&row.try_get::<String, _>("config")?)?;
        annotation_from_row(&row, config.annotation_config.kind()).map(Some)
    }

    /// All annotations of a task, ordered by record index.
    pub async fn list_annotations(&self, task_id: &str) -> AppResult<Vec<Annotation>> {
        let task = self.require_task(task_id).await?;
        let kind = task.config.annotation_config.kind();

        let rows = sqlx::query(
            r#"
            SELECT id, task_id, data_index, result, status, annotator_id, created_at, updated_at
            FROM annotations
            WHERE task_id = ?
            ORDER BY data_index ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| annotation_from_row(row, kind)).collect()
    }

    pub async fn get_task_progress(&self, task_id: &str) -> AppResult<TaskProgress> {
        let task = self.require_task(task_id).await?;

        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT data_index) FROM annotations WHERE task_id = ? AND status = ?",
        )
        .bind(task_id)
        .bind(AnnotationStatus::Done.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(TaskProgress::compute(
            task.config.total_items,
            completed as u64,
        ))
    }

    // ============ Users ============

    /// Returns the user named `username`, creating it with `role` if absent.
    pub async fn ensure_user(&self, username: &str, role: &str) -> AppResult<User> {
        if username.trim().is_empty() {
            return Err(AppError::validation("username must not be empty"));
        }

        sqlx::query(
            r#"
            INSERT INTO users (id, username, role, created_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(username) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(username)
        .bind(role)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.get_user(username)
            .await?
            .ok_or_else(|| AppError::not_found("user", username))
    }

    pub async fn get_user(&self, username: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT id, username, role, created_at FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> AppResult<User> {
            Ok(User {
                id: r.try_get("id")?,
                username: r.try_get("username")?,
                role: r.try_get("role")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }
}

fn task_from_row(row: &SqliteRow) -> AppResult<Task> {
    let config_json: String = row.try_get("config")?;
    let status: String = row.try_get("status")?;

    Ok(Task {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        config: serde_json::from_str(&config_json)?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        data_path: row.try_get("data_path")?,
    })
}

fn annotation_from_row(row: &SqliteRow, kind: AnnotationKind) -> AppResult<Annotation> {
    let result_json: String = row.try_get("result")?;
    let value: serde_json::Value = serde_json::from_str(&result_json)?;
    let status: String = row.try_get("status")?;

    Ok(Annotation {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        data_index: row.try_get::<i64, _>("data_index")? as u64,
        result: AnnotationResult::from_value(kind, &value)?,
        status: AnnotationStatus::parse(&status),
        annotator_id: row.try_get("annotator_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
