//! Core data models used throughout Annotation Desk.
//!
//! These types describe tasks, their configuration blob, annotation results
//! and the progress summaries that flow between the store, the workflow and
//! the HTTP/CLI surfaces.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// One dataset record: a JSON object addressed by its zero-based position.
pub type Record = serde_json::Map<String, Value>;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// Created and in-progress tasks both count as active.
    pub fn is_active(&self) -> bool {
        !matches!(self, TaskStatus::Completed)
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "created" => Ok(TaskStatus::Created),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(AppError::validation(format!(
                "unknown task status: '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    Pending,
    Done,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationStatus::Pending => "pending",
            AnnotationStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "done" {
            AnnotationStatus::Done
        } else {
            AnnotationStatus::Pending
        }
    }
}

/// Declared presentation type of a record field.
///
/// Unknown names are kept as [`FieldType::Other`] so that a task with one bad
/// field still loads; the renderer shows such fields as plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Image,
    Code,
    Pdf,
    Markdown,
    Other(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::Image => "image",
            FieldType::Code => "code",
            FieldType::Pdf => "pdf",
            FieldType::Markdown => "markdown",
            FieldType::Other(name) => name,
        }
    }

    /// Image and PDF fields hold paths to files under the task's base path.
    pub fn is_file_reference(&self) -> bool {
        matches!(self, FieldType::Image | FieldType::Pdf)
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => FieldType::Text,
            "image" => FieldType::Image,
            "code" => FieldType::Code,
            "pdf" => FieldType::Pdf,
            "markdown" => FieldType::Markdown,
            _ => FieldType::Other(s),
        }
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.as_str().to_string()
    }
}

/// How one named record field is displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Highlighting language, code fields only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl FieldConfig {
    pub fn new(kind: FieldType) -> Self {
        Self {
            kind,
            language: None,
        }
    }

    pub fn code(language: impl Into<String>) -> Self {
        Self {
            kind: FieldType::Code,
            language: Some(language.into()),
        }
    }
}

/// Discriminant of [`AnnotationConfig`], used to decode stored results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    SingleChoice,
    MultipleChoice,
    Rating,
    TextInput,
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationKind::SingleChoice => "single_choice",
            AnnotationKind::MultipleChoice => "multiple_choice",
            AnnotationKind::Rating => "rating",
            AnnotationKind::TextInput => "text_input",
        }
    }
}

/// Input widget collected for every record of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationConfig {
    SingleChoice {
        #[serde(default)]
        options: Vec<String>,
        #[serde(default)]
        instruction: String,
    },
    MultipleChoice {
        #[serde(default)]
        options: Vec<String>,
        #[serde(default)]
        instruction: String,
    },
    Rating {
        #[serde(default = "default_min_value")]
        min_value: i64,
        #[serde(default = "default_max_value")]
        max_value: i64,
        #[serde(default)]
        instruction: String,
    },
    TextInput {
        #[serde(default = "default_placeholder")]
        placeholder: String,
        #[serde(default)]
        instruction: String,
    },
}

fn default_min_value() -> i64 {
    1
}
fn default_max_value() -> i64 {
    10
}
fn default_placeholder() -> String {
    "Enter annotation".to_string()
}

impl AnnotationConfig {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            AnnotationConfig::SingleChoice { .. } => AnnotationKind::SingleChoice,
            AnnotationConfig::MultipleChoice { .. } => AnnotationKind::MultipleChoice,
            AnnotationConfig::Rating { .. } => AnnotationKind::Rating,
            AnnotationConfig::TextInput { .. } => AnnotationKind::TextInput,
        }
    }

    pub fn instruction(&self) -> &str {
        match self {
            AnnotationConfig::SingleChoice { instruction, .. }
            | AnnotationConfig::MultipleChoice { instruction, .. }
            | AnnotationConfig::Rating { instruction, .. }
            | AnnotationConfig::TextInput { instruction, .. } => instruction,
        }
    }

    /// Checks the config itself: choice types need options, ratings need a range.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            AnnotationConfig::SingleChoice { options, .. }
            | AnnotationConfig::MultipleChoice { options, .. } => {
                if options.iter().all(|o| o.trim().is_empty()) {
                    return Err(AppError::validation(
                        "choice annotation needs at least one option",
                    ));
                }
                let mut seen = std::collections::HashSet::new();
                for opt in options {
                    if !seen.insert(opt.as_str()) {
                        return Err(AppError::validation(format!(
                            "duplicate option: '{}'",
                            opt
                        )));
                    }
                }
                Ok(())
            }
            AnnotationConfig::Rating {
                min_value,
                max_value,
                ..
            } => {
                if min_value >= max_value {
                    return Err(AppError::validation(format!(
                        "rating range is empty: min {} must be below max {}",
                        min_value, max_value
                    )));
                }
                Ok(())
            }
            AnnotationConfig::TextInput { .. } => Ok(()),
        }
    }
}

/// The typed result of annotating one record.
///
/// Serializes to its natural JSON value (string, list of strings, integer,
/// string), which is also the stored form. Decoding needs the task's
/// [`AnnotationKind`] because choices and free text are both strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnnotationResult {
    Choice(String),
    MultiChoice(Vec<String>),
    Rating(i64),
    Text(String),
}

impl AnnotationResult {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            AnnotationResult::Choice(_) => AnnotationKind::SingleChoice,
            AnnotationResult::MultiChoice(_) => AnnotationKind::MultipleChoice,
            AnnotationResult::Rating(_) => AnnotationKind::Rating,
            AnnotationResult::Text(_) => AnnotationKind::TextInput,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            AnnotationResult::Choice(s) | AnnotationResult::Text(s) => Value::String(s.clone()),
            AnnotationResult::MultiChoice(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            AnnotationResult::Rating(n) => Value::from(*n),
        }
    }

    /// Decodes a JSON value into the variant selected by `kind`.
    pub fn from_value(kind: AnnotationKind, value: &Value) -> AppResult<Self> {
        let mismatch = || {
            AppError::validation(format!(
                "expected a {} result, got {}",
                kind.as_str(),
                value
            ))
        };
        match kind {
            AnnotationKind::SingleChoice => value
                .as_str()
                .map(|s| AnnotationResult::Choice(s.to_string()))
                .ok_or_else(mismatch),
            AnnotationKind::TextInput => value
                .as_str()
                .map(|s| AnnotationResult::Text(s.to_string()))
                .ok_or_else(mismatch),
            AnnotationKind::Rating => value
                .as_i64()
                .map(AnnotationResult::Rating)
                .ok_or_else(mismatch),
            AnnotationKind::MultipleChoice => {
                let items = value.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).ok_or_else(mismatch))
                    .collect::<AppResult<Vec<_>>>()
                    .map(AnnotationResult::MultiChoice)
            }
        }
    }
}

impl fmt::Display for AnnotationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationResult::Choice(s) | AnnotationResult::Text(s) => f.write_str(s),
            AnnotationResult::MultiChoice(items) => f.write_str(&items.join(", ")),
            AnnotationResult::Rating(n) => write!(f, "{}", n),
        }
    }
}

/// Configuration blob stored with every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub field_configs: BTreeMap<String, FieldConfig>,
    #[serde(default)]
    pub selected_fields: Vec<String>,
    pub annotation_config: AnnotationConfig,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub total_items: u64,
}

/// Input to [`Store::create_task`](crate::store::Store::create_task).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub config: TaskConfig,
    pub data_path: String,
}

/// A configured unit of annotation work over one dataset.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub config: TaskConfig,
    pub status: TaskStatus,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    pub data_path: String,
}

/// The stored result of annotating one record within one task.
#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
    pub id: String,
    pub task_id: String,
    pub data_index: u64,
    pub result: AnnotationResult,
    pub status: AnnotationStatus,
    pub annotator_id: String,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

/// Present in the schema for forward compatibility; no access control uses it.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: String,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
}

/// Completion summary for one task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskProgress {
    pub total: u64,
    pub completed: u64,
    /// Percentage in `[0, 100]`, rounded to two decimals.
    pub progress: f64,
}

impl TaskProgress {
    pub fn compute(total: u64, completed: u64) -> Self {
        let progress = if total == 0 {
            0.0
        } else {
            let raw = completed as f64 * 100.0 / total as f64;
            (raw * 100.0).round() / 100.0
        };
        Self {
            total,
            completed,
            progress,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

impl fmt::Display for TaskProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%)",
            self.completed, self.total, self.progress
        )
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn serialize_ts<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ts_iso(*ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_two_of_three() {
        let p = TaskProgress::compute(3, 2);
        assert!((p.progress - 66.67).abs() < 1e-9);
        assert_eq!(p.to_string(), "2/3 (66.7%)");
    }

    #[test]
    fn progress_empty_task_is_zero() {
        let p = TaskProgress::compute(0, 0);
        assert_eq!(p.progress, 0.0);
        assert!(!p.is_complete());
    }

    #[test]
    fn unknown_field_type_is_kept() {
        let cfg: FieldConfig = serde_json::from_value(json!({"type": "audio"})).unwrap();
        assert_eq!(cfg.kind, FieldType::Other("audio".to_string()));
        assert_eq!(serde_json::to_value(&cfg).unwrap(), json!({"type": "audio"}));
    }

    #[test]
    fn annotation_config_blob_shape() {
        let cfg: AnnotationConfig = serde_json::from_value(json!({
            "type": "rating",
            "min_value": 1,
            "max_value": 5,
            "instruction": "rate it"
        }))
        .unwrap();
        assert_eq!(cfg.kind(), AnnotationKind::Rating);
        assert_eq!(cfg.instruction(), "rate it");
        cfg.validate().unwrap();
    }

    #[test]
    fn choice_config_without_options_is_invalid() {
        let cfg = AnnotationConfig::SingleChoice {
            options: vec![],
            instruction: String::new(),
        };
        assert!(matches!(cfg.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn rating_config_with_inverted_range_is_invalid() {
        let cfg = AnnotationConfig::Rating {
            min_value: 5,
            max_value: 5,
            instruction: String::new(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn result_decodes_by_kind() {
        let v = json!("True");
        assert_eq!(
            AnnotationResult::from_value(AnnotationKind::SingleChoice, &v).unwrap(),
            AnnotationResult::Choice("True".to_string())
        );
        assert_eq!(
            AnnotationResult::from_value(AnnotationKind::TextInput, &v).unwrap(),
            AnnotationResult::Text("True".to_string())
        );
        assert!(AnnotationResult::from_value(AnnotationKind::Rating, &v).is_err());

        let multi = AnnotationResult::MultiChoice(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(multi.to_value(), json!(["a", "b"]));
        assert_eq!(
            AnnotationResult::from_value(AnnotationKind::MultipleChoice, &multi.to_value())
                .unwrap(),
            multi
        );
    }

    #[test]
    fn result_serializes_untagged() {
        let r = AnnotationResult::Rating(4);
        assert_eq!(serde_json::to_value(&r).unwrap(), json!(4));
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            TaskStatus::Created,
            TaskStatus::InProgress,
            TaskStatus::Completed,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>().unwrap(), s);
        }
        assert!("archived".parse::<TaskStatus>().is_err());
    }
}
