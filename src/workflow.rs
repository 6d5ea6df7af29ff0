//! Per-session workflow: configure a task, annotate it, review, export.
//!
//! ```text
//! Configuring ── Upload(0) → SelectFields(1) → ConfigureAnnotation(2) → Confirm(3)
//!      │                                                                    │ create_task
//!      │ open_task                                                          ▼
//!      └──────────────────────────────────────────────────────────────▶ Annotating ◀─┐
//!                                                                           │ review  │ open_task
//!                                                                           ▼         │
//!                                                                       Reviewing ──▶ Exported
//! ```
//!
//! All state lives in a [`Session`] owned by the caller; nothing is global.
//! Every operation either succeeds or returns an error with the session
//! unchanged.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::export::{self, ExportOptions, ExportOutput};
use crate::form::{self, FormControl};
use crate::jsonl::{self, PathReport};
use crate::layout::Layout;
use crate::models::{
    AnnotationConfig, AnnotationResult, FieldConfig, FieldType, NewTask, Record, Task, TaskConfig,
    TaskProgress,
};
use crate::render::{self, RenderedField};
use crate::store::Store;

/// Configuration steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Upload,
    SelectFields,
    ConfigureAnnotation,
    Confirm,
}

impl Step {
    pub fn index(&self) -> usize {
        match self {
            Step::Upload => 0,
            Step::SelectFields => 1,
            Step::ConfigureAnnotation => 2,
            Step::Confirm => 3,
        }
    }

    fn next(&self) -> Option<Step> {
        match self {
            Step::Upload => Some(Step::SelectFields),
            Step::SelectFields => Some(Step::ConfigureAnnotation),
            Step::ConfigureAnnotation => Some(Step::Confirm),
            Step::Confirm => None,
        }
    }

    fn prev(&self) -> Step {
        match self {
            Step::Upload | Step::SelectFields => Step::Upload,
            Step::ConfigureAnnotation => Step::SelectFields,
            Step::Confirm => Step::ConfigureAnnotation,
        }
    }
}

/// Task being configured, before it is persisted.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub records: Vec<Record>,
    pub file_name: Option<String>,
    pub base_path: String,
    pub selected_fields: Vec<String>,
    pub field_configs: BTreeMap<String, FieldConfig>,
    pub annotation_config: Option<AnnotationConfig>,
}

impl Draft {
    /// Fields offered for display: those of the first record.
    pub fn available_fields(&self) -> Vec<String> {
        jsonl::field_names(&self.records)
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    Configuring(Step),
    Annotating {
        task: Task,
        records: Vec<Record>,
        index: u64,
    },
    Reviewing {
        task_id: String,
        progress: TaskProgress,
    },
    Exported {
        task_id: String,
        output: ExportOutput,
    },
}

/// Everything shown for the record under annotation.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    pub task_id: String,
    pub task_name: String,
    pub index: u64,
    pub total: u64,
    pub instruction: String,
    pub fields: Vec<RenderedField>,
    pub control: FormControl,
    pub annotated: bool,
    pub progress: TaskProgress,
}

/// Serializable summary of where a session stands.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub uploaded_records: usize,
    pub available_fields: Vec<String>,
    pub selected_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    stage: Stage,
    draft: Draft,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            stage: Stage::Configuring(Step::Upload),
            draft: Draft::default(),
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Discards all session state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn current_task_id(&self) -> Option<&str> {
        match &self.stage {
            Stage::Configuring(_) => None,
            Stage::Annotating { task, .. } => Some(&task.id),
            Stage::Reviewing { task_id, .. } | Stage::Exported { task_id, .. } => Some(task_id),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let (stage, step, index, progress, export_path) = match &self.stage {
            Stage::Configuring(step) => ("configuring", Some(*step), None, None, None),
            Stage::Annotating { index, .. } => ("annotating", None, Some(*index), None, None),
            Stage::Reviewing { progress, .. } => ("reviewing", None, None, Some(*progress), None),
            Stage::Exported { output, .. } => (
                "exported",
                None,
                None,
                None,
                Some(output.path.display().to_string()),
            ),
        };
        SessionSummary {
            stage,
            step,
            step_index: step.map(|s| s.index()),
            uploaded_records: self.draft.records.len(),
            available_fields: self.draft.available_fields(),
            selected_fields: self.draft.selected_fields.clone(),
            task_id: self.current_task_id().map(str::to_string),
            index,
            progress,
            export_path,
        }
    }

    // ============ Configuring ============

    fn require_step(&self, expected: Step) -> AppResult<()> {
        match self.stage {
            Stage::Configuring(step) if step == expected => Ok(()),
            _ => Err(AppError::validation(format!(
                "not at the {:?} step of task configuration",
                expected
            ))),
        }
    }

    /// Step 0: parse an uploaded dataset. Every field starts selected and
    /// typed as text. Returns the number of records.
    pub fn upload(&mut self, content: &str, file_name: Option<&str>) -> AppResult<usize> {
        self.require_step(Step::Upload)?;
        let records = jsonl::load(content)?;

        let fields = jsonl::field_names(&records);
        self.draft = Draft {
            field_configs: fields
                .iter()
                .map(|f| (f.clone(), FieldConfig::new(FieldType::Text)))
                .collect(),
            selected_fields: fields,
            records,
            file_name: file_name.map(str::to_string),
            base_path: std::mem::take(&mut self.draft.base_path),
            annotation_config: None,
        };
        tracing::info!(records = self.draft.records.len(), "dataset uploaded");
        Ok(self.draft.records.len())
    }

    pub fn set_base_path(&mut self, base_path: &str) {
        self.draft.base_path = base_path.trim().to_string();
    }

    /// Missing and invalid file references in the uploaded dataset. Before
    /// fields are typed, file references are recognised by extension.
    pub fn path_report(&self) -> PathReport {
        let typed = match self.stage {
            Stage::Configuring(Step::Upload) => None,
            _ => Some(&self.draft.field_configs),
        };
        jsonl::validate_paths(&self.draft.records, &self.draft.base_path, typed)
    }

    /// Step 1: choose and type the displayed fields. Selected fields without
    /// an entry in `field_configs` are shown as text.
    pub fn select_fields(
        &mut self,
        selected: Vec<String>,
        field_configs: BTreeMap<String, FieldConfig>,
    ) -> AppResult<()> {
        self.require_step(Step::SelectFields)?;
        if selected.is_empty() {
            return Err(AppError::validation("select at least one field"));
        }
        let available = self.draft.available_fields();
        if let Some(unknown) = selected.iter().find(|f| !available.contains(f)) {
            return Err(AppError::validation(format!(
                "unknown field '{}'; dataset fields are: {}",
                unknown,
                available.join(", ")
            )));
        }

        let configs = selected
            .iter()
            .map(|f| {
                let cfg = field_configs
                    .get(f)
                    .cloned()
                    .unwrap_or_else(|| FieldConfig::new(FieldType::Text));
                (f.clone(), cfg)
            })
            .collect();
        self.draft.selected_fields = selected;
        self.draft.field_configs = configs;
        Ok(())
    }

    /// Step 2: choose the annotation widget.
    pub fn configure_annotation(&mut self, config: AnnotationConfig) -> AppResult<()> {
        self.require_step(Step::ConfigureAnnotation)?;
        config.validate()?;
        self.draft.annotation_config = Some(config);
        Ok(())
    }

    /// Moves to the next configuration step if the current one is complete.
    pub fn advance(&mut self) -> AppResult<Step> {
        let step = match self.stage {
            Stage::Configuring(step) => step,
            _ => return Err(AppError::validation("not configuring a task")),
        };
        match step {
            Step::Upload if self.draft.records.is_empty() => {
                return Err(AppError::validation("upload a non-empty dataset first"))
            }
            Step::SelectFields if self.draft.selected_fields.is_empty() => {
                return Err(AppError::validation("select at least one field"))
            }
            Step::ConfigureAnnotation => match &self.draft.annotation_config {
                Some(cfg) => cfg.validate()?,
                None => return Err(AppError::validation("configure the annotation input first")),
            },
            _ => {}
        }
        let next = step
            .next()
            .ok_or_else(|| AppError::validation("configuration is complete; create the task"))?;
        self.stage = Stage::Configuring(next);
        Ok(next)
    }

    pub fn back(&mut self) -> AppResult<Step> {
        match self.stage {
            Stage::Configuring(step) => {
                let prev = step.prev();
                self.stage = Stage::Configuring(prev);
                Ok(prev)
            }
            _ => Err(AppError::validation("not configuring a task")),
        }
    }

    /// Step 3: persist the task and start annotating it at record 0.
    ///
    /// The dataset is copied into the layout's data directory. If the store
    /// rejects the task, the copy is removed and the draft is kept.
    pub async fn create_task(
        &mut self,
        store: &Store,
        layout: &Layout,
        name: &str,
        description: &str,
    ) -> AppResult<String> {
        self.require_step(Step::Confirm)?;
        if name.trim().is_empty() {
            return Err(AppError::validation("task name must not be empty"));
        }
        let annotation_config = self
            .draft
            .annotation_config
            .clone()
            .ok_or_else(|| AppError::validation("configure the annotation input first"))?;

        let data_path = layout.data_dir().join(format!(
            "task_data_{}_{}.jsonl",
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        jsonl::save(&self.draft.records, &data_path)?;

        let new_task = NewTask {
            name: name.trim().to_string(),
            description: description.to_string(),
            config: TaskConfig {
                field_configs: self.draft.field_configs.clone(),
                selected_fields: self.draft.selected_fields.clone(),
                annotation_config,
                base_path: self.draft.base_path.clone(),
                total_items: self.draft.records.len() as u64,
            },
            data_path: data_path.display().to_string(),
        };

        let task_id = match store.create_task(&new_task).await {
            Ok(id) => id,
            Err(e) => {
                let _ = std::fs::remove_file(&data_path);
                return Err(e);
            }
        };
        let task = store.require_task(&task_id).await?;

        let draft = std::mem::take(&mut self.draft);
        self.stage = Stage::Annotating {
            task,
            records: draft.records,
            index: 0,
        };
        Ok(task_id)
    }

    // ============ Annotating ============

    /// Opens an existing task for annotation at record 0.
    pub async fn open_task(&mut self, store: &Store, task_id: &str) -> AppResult<()> {
        let task = store.require_task(task_id).await?;
        let records = jsonl::load_file(Path::new(&task.data_path))?;
        if records.is_empty() {
            return Err(AppError::validation(format!(
                "task '{}' has an empty dataset",
                task.name
            )));
        }
        self.stage = Stage::Annotating {
            task,
            records,
            index: 0,
        };
        Ok(())
    }

    fn annotating(&self) -> AppResult<(&Task, &[Record], u64)> {
        match &self.stage {
            Stage::Annotating {
                task,
                records,
                index,
            } => Ok((task, records, *index)),
            _ => Err(AppError::validation("no task is open for annotation")),
        }
    }

    fn set_index(&mut self, new_index: u64) {
        if let Stage::Annotating { index, .. } = &mut self.stage {
            *index = new_index;
        }
    }

    /// Renders the current record with its control and progress.
    pub async fn current_view(&self, store: &Store) -> AppResult<RecordView> {
        let (task, records, index) = self.annotating()?;
        let record = records
            .get(index as usize)
            .ok_or_else(|| AppError::not_found("record", index.to_string()))?;

        let prior = store.get_annotation(&task.id, index).await?;
        let control = form::build_control(
            form::control_key(&task.id, index),
            &task.config.annotation_config,
            prior.as_ref().map(|a| &a.result),
        );

        Ok(RecordView {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            index,
            total: records.len() as u64,
            instruction: task.config.annotation_config.instruction().to_string(),
            fields: render::render_record(record, &task.config),
            control,
            annotated: prior.is_some(),
            progress: store.get_task_progress(&task.id).await?,
        })
    }

    pub fn next(&mut self) -> AppResult<u64> {
        let (_, records, index) = self.annotating()?;
        let last = records.len().saturating_sub(1) as u64;
        let new_index = (index + 1).min(last);
        self.set_index(new_index);
        Ok(new_index)
    }

    pub fn prev(&mut self) -> AppResult<u64> {
        let (_, _, index) = self.annotating()?;
        let new_index = index.saturating_sub(1);
        self.set_index(new_index);
        Ok(new_index)
    }

    pub fn jump(&mut self, target: u64) -> AppResult<u64> {
        let (_, records, _) = self.annotating()?;
        if target >= records.len() as u64 {
            return Err(AppError::validation(format!(
                "record {} is out of range (0..{})",
                target,
                records.len()
            )));
        }
        self.set_index(target);
        Ok(target)
    }

    /// Persists a result for the current record and moves to the next one
    /// (staying on the last record). The index is unchanged on failure.
    pub async fn submit(&mut self, store: &Store, value: &Value) -> AppResult<AnnotationResult> {
        let (task, records, index) = self.annotating()?;
        let result = form::parse_input(&task.config.annotation_config, value)?;
        store.save_annotation(&task.id, index, &result).await?;

        let last = records.len().saturating_sub(1) as u64;
        self.set_index((index + 1).min(last));
        Ok(result)
    }

    // ============ Reviewing / Exported ============

    pub async fn review(&mut self, store: &Store) -> AppResult<TaskProgress> {
        let task_id = self
            .current_task_id()
            .ok_or_else(|| AppError::validation("no task selected"))?
            .to_string();
        let progress = store.get_task_progress(&task_id).await?;
        self.stage = Stage::Reviewing { task_id, progress };
        Ok(progress)
    }

    pub async fn export(
        &mut self,
        store: &Store,
        layout: &Layout,
        options: &ExportOptions,
    ) -> AppResult<ExportOutput> {
        let task_id = self
            .current_task_id()
            .ok_or_else(|| AppError::validation("no task selected"))?
            .to_string();
        let output = export::export_task(store, layout, &task_id, options, None).await?;
        self.stage = Stage::Exported {
            task_id,
            output: output.clone(),
        };
        Ok(output)
    }
}

/// Name suggested when the user gives none.
pub fn default_task_name() -> String {
    format!(
        "annotation_task_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::TaskStatus;
    use serde_json::json;
    use tempfile::TempDir;

    const DATA: &str = "{\"question\": \"q1\", \"answer\": \"a1\"}\n{\"question\": \"q2\", \"answer\": \"a2\"}\n{\"question\": \"q3\", \"answer\": \"a3\"}\n";

    async fn env(tmp: &TempDir) -> (Store, Layout) {
        let store = Store::open(&Config::rooted_at(tmp.path())).await.unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();
        (store, layout)
    }

    fn rating() -> AnnotationConfig {
        AnnotationConfig::Rating {
            min_value: 1,
            max_value: 5,
            instruction: "rate the answer".to_string(),
        }
    }

    fn configured() -> Session {
        let mut s = Session::new();
        s.upload(DATA, Some("qa.jsonl")).unwrap();
        s.advance().unwrap();
        s.select_fields(vec!["question".to_string()], BTreeMap::new())
            .unwrap();
        s.advance().unwrap();
        s.configure_annotation(rating()).unwrap();
        s.advance().unwrap();
        s
    }

    #[test]
    fn cannot_leave_upload_without_data() {
        let mut s = Session::new();
        assert!(matches!(s.advance(), Err(AppError::Validation(_))));
        s.upload("\n  \n", None).unwrap();
        assert!(s.advance().is_err());
        assert!(matches!(s.stage(), Stage::Configuring(Step::Upload)));
    }

    #[test]
    fn bad_upload_leaves_previous_dataset() {
        let mut s = Session::new();
        s.upload(DATA, None).unwrap();
        let err = s.upload("{\"ok\": 1}\n{broken", None).unwrap_err();
        assert!(matches!(err, AppError::Parse { line: 2, .. }));
        assert_eq!(s.draft().records.len(), 3);
    }

    #[test]
    fn upload_preselects_all_fields_as_text() {
        let mut s = Session::new();
        s.upload(DATA, None).unwrap();
        assert_eq!(s.draft().selected_fields, vec!["question", "answer"]);
        assert_eq!(
            s.draft().field_configs["answer"],
            FieldConfig::new(FieldType::Text)
        );
    }

    #[test]
    fn cannot_leave_field_step_without_selection() {
        let mut s = Session::new();
        s.upload(DATA, None).unwrap();
        s.advance().unwrap();
        assert!(s.select_fields(vec![], BTreeMap::new()).is_err());
        assert!(s
            .select_fields(vec!["nope".to_string()], BTreeMap::new())
            .is_err());
        assert_eq!(s.draft().selected_fields, vec!["question", "answer"]);
    }

    #[test]
    fn invalid_annotation_config_blocks_step() {
        let mut s = Session::new();
        s.upload(DATA, None).unwrap();
        s.advance().unwrap();
        s.advance().unwrap();
        assert!(s.advance().is_err());
        let bad = AnnotationConfig::SingleChoice {
            options: vec![],
            instruction: String::new(),
        };
        assert!(s.configure_annotation(bad).is_err());
        assert!(matches!(
            s.stage(),
            Stage::Configuring(Step::ConfigureAnnotation)
        ));
    }

    #[test]
    fn back_walks_steps() {
        let mut s = configured();
        assert_eq!(s.back().unwrap(), Step::ConfigureAnnotation);
        assert_eq!(s.back().unwrap(), Step::SelectFields);
        assert_eq!(s.back().unwrap(), Step::Upload);
        assert_eq!(s.back().unwrap(), Step::Upload);
    }

    #[test]
    fn path_report_uses_declared_types_after_upload() {
        let mut s = Session::new();
        s.upload("{\"img\": \"x.png\", \"caption\": \"y.png\"}", None)
            .unwrap();
        s.set_base_path("/no/such/base");
        assert_eq!(s.path_report().missing.len(), 2);

        s.advance().unwrap();
        let mut configs = BTreeMap::new();
        configs.insert("img".to_string(), FieldConfig::new(FieldType::Image));
        s.select_fields(vec!["img".to_string(), "caption".to_string()], configs)
            .unwrap();
        assert_eq!(
            s.path_report().missing,
            vec!["record 1 field img: x.png".to_string()]
        );
    }

    #[tokio::test]
    async fn create_requires_name() {
        let tmp = TempDir::new().unwrap();
        let (store, layout) = env(&tmp).await;
        let mut s = configured();
        let err = s.create_task(&store, &layout, "  ", "").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(matches!(s.stage(), Stage::Configuring(Step::Confirm)));
        assert!(store.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_annotate_review_export() {
        let tmp = TempDir::new().unwrap();
        let (store, layout) = env(&tmp).await;
        let mut s = configured();

        let task_id = s.create_task(&store, &layout, "qa", "rate").await.unwrap();
        assert!(s.draft().records.is_empty());
        let task = store.require_task(&task_id).await.unwrap();
        assert_eq!(task.config.total_items, 3);
        assert!(Path::new(&task.data_path).starts_with(layout.data_dir()));

        let view = s.current_view(&store).await.unwrap();
        assert_eq!(view.index, 0);
        assert_eq!(view.instruction, "rate the answer");
        assert_eq!(view.fields.len(), 1);
        assert_eq!(view.control.key(), format!("annotation_{}_0", task_id));
        assert!(!view.annotated);

        s.submit(&store, &json!(4)).await.unwrap();
        assert_eq!(s.summary().index, Some(1));

        s.jump(2).unwrap();
        s.submit(&store, &json!(2)).await.unwrap();
        // clamped on the last record
        assert_eq!(s.summary().index, Some(2));

        let progress = s.review(&store).await.unwrap();
        assert_eq!((progress.total, progress.completed), (3, 2));

        let out = s
            .export(&store, &layout, &ExportOptions::default())
            .await
            .unwrap();
        assert_eq!(out.rows, 3);
        assert!(out.path.starts_with(layout.reports_dir()));
        assert!(matches!(s.stage(), Stage::Exported { .. }));

        // re-enter
        s.open_task(&store, &task_id).await.unwrap();
        let view = s.current_view(&store).await.unwrap();
        assert!(view.annotated);
        assert_eq!(view.control.current(), Some(AnnotationResult::Rating(4)));
    }

    #[tokio::test]
    async fn rejected_submit_keeps_index() {
        let tmp = TempDir::new().unwrap();
        let (store, layout) = env(&tmp).await;
        let mut s = configured();
        let task_id = s.create_task(&store, &layout, "qa", "").await.unwrap();

        assert!(s.submit(&store, &json!(42)).await.is_err());
        assert_eq!(s.summary().index, Some(0));
        assert!(store.get_annotation(&task_id, 0).await.unwrap().is_none());
        assert_eq!(
            store.require_task(&task_id).await.unwrap().status,
            TaskStatus::Created
        );
    }

    #[tokio::test]
    async fn navigation_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let (store, layout) = env(&tmp).await;
        let mut s = configured();
        s.create_task(&store, &layout, "qa", "").await.unwrap();

        assert_eq!(s.prev().unwrap(), 0);
        assert_eq!(s.next().unwrap(), 1);
        assert_eq!(s.next().unwrap(), 2);
        assert_eq!(s.next().unwrap(), 2);
        assert!(s.jump(3).is_err());
        assert_eq!(s.summary().index, Some(2));
    }

    #[tokio::test]
    async fn annotating_requires_open_task() {
        let tmp = TempDir::new().unwrap();
        let (store, _layout) = env(&tmp).await;
        let mut s = Session::new();
        assert!(s.next().is_err());
        assert!(s.current_view(&store).await.is_err());
        assert!(matches!(
            s.open_task(&store, "missing").await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[test]
    fn default_name_has_timestamp() {
        assert!(default_task_name().starts_with("annotation_task_"));
    }
}
