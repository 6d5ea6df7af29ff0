//! Task overview.
//!
//! Counts tasks by status and lists each with its progress. Used by
//! `anno tasks` and `GET /tasks`.

use serde::Serialize;

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{format_ts_iso, TaskProgress, TaskStatus};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub progress: TaskProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total: u64,
    pub active: u64,
    pub completed: u64,
    pub tasks: Vec<TaskSummary>,
}

/// Every task, newest first, with status counts.
pub async fn overview(store: &Store) -> AppResult<Overview> {
    let counts = store.status_counts().await?;
    let mut tasks = Vec::new();
    for task in store.list_tasks().await? {
        let progress = store.get_task_progress(&task.id).await?;
        tasks.push(TaskSummary {
            created_at: format_ts_iso(task.created_at),
            id: task.id,
            name: task.name,
            status: task.status,
            progress,
        });
    }
    Ok(Overview {
        total: counts.total,
        active: counts.active,
        completed: counts.completed,
        tasks,
    })
}

/// Run the tasks command: print counts and a per-task table.
pub async fn run_tasks(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(config).await?;
    let ov = overview(&store).await?;

    println!("Annotation tasks");
    println!("================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size(config)));
    println!();
    println!("  Total:       {}", ov.total);
    println!("  Active:      {}", ov.active);
    println!("  Completed:   {}", ov.completed);

    if !ov.tasks.is_empty() {
        println!();
        println!(
            "  {:<36} {:<24} {:<12} {:>16}   {}",
            "ID", "NAME", "STATUS", "PROGRESS", "CREATED"
        );
        println!("  {}", "-".repeat(112));
        for t in &ov.tasks {
            println!(
                "  {:<36} {:<24} {:<12} {:>16}   {}",
                t.id,
                truncate(&t.name, 24),
                t.status,
                t.progress.to_string(),
                t.created_at
            );
        }
    }
    println!();

    store.close().await;
    Ok(())
}

fn db_size(config: &Config) -> u64 {
    std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0)
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width - 1).collect();
        out.push('…');
        out
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotationConfig, AnnotationResult, NewTask, TaskConfig};
    use tempfile::TempDir;

    fn new_task(name: &str, total: u64) -> NewTask {
        NewTask {
            name: name.to_string(),
            description: String::new(),
            config: TaskConfig {
                field_configs: Default::default(),
                selected_fields: vec!["q".to_string()],
                annotation_config: AnnotationConfig::Rating {
                    min_value: 1,
                    max_value: 5,
                    instruction: String::new(),
                },
                base_path: String::new(),
                total_items: total,
            },
            data_path: "data/x.jsonl".to_string(),
        }
    }

    #[tokio::test]
    async fn overview_counts_by_status() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&Config::rooted_at(tmp.path())).await.unwrap();

        let a = store.create_task(&new_task("a", 1)).await.unwrap();
        let b = store.create_task(&new_task("b", 2)).await.unwrap();
        store.create_task(&new_task("c", 2)).await.unwrap();
        store
            .save_annotation(&a, 0, &AnnotationResult::Rating(3))
            .await
            .unwrap();
        store
            .save_annotation(&b, 1, &AnnotationResult::Rating(3))
            .await
            .unwrap();

        let ov = overview(&store).await.unwrap();
        assert_eq!((ov.total, ov.active, ov.completed), (3, 2, 1));
        let a_row = ov.tasks.iter().find(|t| t.id == a).unwrap();
        assert_eq!(a_row.status, TaskStatus::Completed);
        assert_eq!(a_row.progress.progress, 100.0);
        let b_row = ov.tasks.iter().find(|t| t.id == b).unwrap();
        assert_eq!(b_row.progress.progress, 50.0);
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn bytes_format() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
