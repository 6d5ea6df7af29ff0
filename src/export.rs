//! Export annotation results joined with their dataset records.
//!
//! Produces one row per record (or per annotated record with
//! `only_completed`): the original fields, then `annotation_result`,
//! `annotation_status` and `data_index`. Files are written to
//! `test_data/reports/` unless an explicit output path is given.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::jsonl;
use crate::layout::Layout;
use crate::models::{Annotation, AnnotationResult, Record};
use crate::render::value_text;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Jsonl,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "jsonl" => Ok(ExportFormat::Jsonl),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(AppError::validation(format!(
                "unknown export format: '{}'. Must be json, jsonl, or csv.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportOptions {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_include_original")]
    pub include_original: bool,
    #[serde(default)]
    pub only_completed: bool,
}

fn default_include_original() -> bool {
    true
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            include_original: true,
            only_completed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutput {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub rows: usize,
}

/// Joins records with results by index.
pub fn build_rows(records: &[Record], annotations: &[Annotation], options: &ExportOptions) -> Vec<Record> {
    let by_index: HashMap<u64, &AnnotationResult> = annotations
        .iter()
        .map(|a| (a.data_index, &a.result))
        .collect();

    records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let result = by_index.get(&(i as u64));
            if options.only_completed && result.is_none() {
                return None;
            }
            let mut row = if options.include_original {
                record.clone()
            } else {
                Record::new()
            };
            row.insert(
                "annotation_result".to_string(),
                result.map(|r| r.to_value()).unwrap_or(Value::Null),
            );
            row.insert(
                "annotation_status".to_string(),
                Value::String(if result.is_some() { "completed" } else { "pending" }.to_string()),
            );
            row.insert("data_index".to_string(), Value::from(i as u64));
            Some(row)
        })
        .collect()
}

/// Serializes rows in the requested format.
pub fn encode(rows: &[Record], format: ExportFormat) -> AppResult<Vec<u8>> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(rows)?),
        ExportFormat::Jsonl => {
            let mut out = Vec::new();
            for row in rows {
                serde_json::to_writer(&mut out, row)?;
                out.push(b'\n');
            }
            Ok(out)
        }
        ExportFormat::Csv => encode_csv(rows),
    }
}

fn encode_csv(rows: &[Record]) -> AppResult<Vec<u8>> {
    // Union of keys in first-seen order
    let mut headers: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !headers.contains(&key.as_str()) {
                headers.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&headers)
        .map_err(|e| AppError::Export(e.to_string()))?;
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| row.get(*h).map(value_text).unwrap_or_default())
            .collect();
        writer
            .write_record(&cells)
            .map_err(|e| AppError::Export(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Export(e.to_string()))
}

/// Exports a task's results and returns where they were written.
///
/// With `output` unset the file goes to the reports directory as
/// `export_{task name}_{timestamp}.{ext}`.
pub async fn export_task(
    store: &Store,
    layout: &Layout,
    task_id: &str,
    options: &ExportOptions,
    output: Option<&Path>,
) -> AppResult<ExportOutput> {
    let task = store.require_task(task_id).await?;
    let progress = store.get_task_progress(task_id).await?;
    if progress.completed == 0 {
        return Err(AppError::validation(format!(
            "task '{}' has no annotations to export",
            task.name
        )));
    }

    let records = jsonl::load_file(Path::new(&task.data_path))?;
    let annotations = store.list_annotations(task_id).await?;
    let rows = build_rows(&records, &annotations, options);
    let bytes = encode(&rows, options.format)?;

    let path = match output {
        Some(p) => p.to_path_buf(),
        None => layout.reports_dir().join(format!(
            "export_{}_{}.{}",
            sanitize_file_stem(&task.name),
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            options.format.extension()
        )),
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
        }
    }
    std::fs::write(&path, &bytes).map_err(|e| AppError::io(&path, e))?;

    tracing::info!(task_id, rows = rows.len(), path = %path.display(), "export written");
    Ok(ExportOutput {
        path,
        format: options.format,
        rows: rows.len(),
    })
}

fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}
