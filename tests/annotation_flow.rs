//! Library-level annotation flow: dataset in, task created, records
//! annotated, progress and results read back.

use std::collections::BTreeMap;

use annotation_desk::config::Config;
use annotation_desk::error::AppError;
use annotation_desk::jsonl;
use annotation_desk::layout::Layout;
use annotation_desk::models::{
    AnnotationConfig, AnnotationResult, FieldConfig, FieldType, NewTask, TaskConfig, TaskStatus,
};
use annotation_desk::store::Store;
use annotation_desk::workflow::Session;
use serde_json::json;
use tempfile::TempDir;

const QA: &str = r#"{"question": "What is 2+2?", "answer": "4"}
{"question": "Capital of France?", "answer": "Paris"}
{"question": "Largest planet?", "answer": "Mars"}
"#;

async fn open(tmp: &TempDir) -> (Store, Layout) {
    let store = Store::open(&Config::rooted_at(tmp.path())).await.unwrap();
    let layout = Layout::new(tmp.path());
    layout.ensure().unwrap();
    (store, layout)
}

async fn rating_task(store: &Store, layout: &Layout) -> String {
    let mut session = Session::new();
    session.upload(QA, Some("qa.jsonl")).unwrap();
    session.advance().unwrap();
    session
        .select_fields(
            vec!["question".to_string(), "answer".to_string()],
            BTreeMap::new(),
        )
        .unwrap();
    session.advance().unwrap();
    session
        .configure_annotation(AnnotationConfig::Rating {
            min_value: 1,
            max_value: 5,
            instruction: "Is the answer right?".to_string(),
        })
        .unwrap();
    session.advance().unwrap();
    session
        .create_task(store, layout, "qa rating", "")
        .await
        .unwrap()
}

#[tokio::test]
async fn rating_scenario_counts_distinct_records() {
    let tmp = TempDir::new().unwrap();
    let (store, layout) = open(&tmp).await;
    let task_id = rating_task(&store, &layout).await;

    let task = store.require_task(&task_id).await.unwrap();
    assert_eq!(task.config.total_items, 3);
    assert_eq!(task.status, TaskStatus::Created);

    store
        .save_annotation(&task_id, 0, &AnnotationResult::Rating(4))
        .await
        .unwrap();
    store
        .save_annotation(&task_id, 2, &AnnotationResult::Rating(2))
        .await
        .unwrap();

    let progress = store.get_task_progress(&task_id).await.unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 2);
    assert!((progress.progress - 66.67).abs() < 1e-9);
    assert_eq!(progress.to_string(), "2/3 (66.7%)");

    store
        .save_annotation(&task_id, 0, &AnnotationResult::Rating(5))
        .await
        .unwrap();
    let progress = store.get_task_progress(&task_id).await.unwrap();
    assert_eq!(progress.completed, 2);

    let stored = store.get_annotation(&task_id, 0).await.unwrap().unwrap();
    assert_eq!(stored.result, AnnotationResult::Rating(5));
    assert_eq!(stored.annotator_id, "user1");
    assert_eq!(store.list_annotations(&task_id).await.unwrap().len(), 2);
    assert_eq!(
        store.require_task(&task_id).await.unwrap().status,
        TaskStatus::InProgress
    );
}

#[tokio::test]
async fn dataset_copy_round_trips() {
    let tmp = TempDir::new().unwrap();
    let (store, layout) = open(&tmp).await;
    let task_id = rating_task(&store, &layout).await;

    let task = store.require_task(&task_id).await.unwrap();
    let copied = jsonl::load_file(std::path::Path::new(&task.data_path)).unwrap();
    assert_eq!(copied, jsonl::load(QA).unwrap());
    let name = std::path::Path::new(&task.data_path)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert!(name.starts_with("task_data_") && name.ends_with(".jsonl"));
}

#[tokio::test]
async fn session_submit_walks_records_and_completes_task() {
    let tmp = TempDir::new().unwrap();
    let (store, layout) = open(&tmp).await;

    let mut session = Session::new();
    session.upload(QA, None).unwrap();
    session.advance().unwrap();
    let mut configs = BTreeMap::new();
    configs.insert("answer".to_string(), FieldConfig::new(FieldType::Markdown));
    session
        .select_fields(vec!["answer".to_string()], configs)
        .unwrap();
    session.advance().unwrap();
    session
        .configure_annotation(AnnotationConfig::SingleChoice {
            options: vec!["True".to_string(), "False".to_string()],
            instruction: String::new(),
        })
        .unwrap();
    session.advance().unwrap();
    let task_id = session
        .create_task(&store, &layout, "truth", "")
        .await
        .unwrap();

    for answer in ["True", "True", "False"] {
        session.submit(&store, &json!(answer)).await.unwrap();
    }
    let view = session.current_view(&store).await.unwrap();
    assert_eq!(view.index, 2);
    assert!(view.progress.is_complete());
    assert_eq!(
        view.control.current(),
        Some(AnnotationResult::Choice("False".to_string()))
    );
    assert_eq!(
        store.require_task(&task_id).await.unwrap().status,
        TaskStatus::Completed
    );

    let progress = session.review(&store).await.unwrap();
    assert_eq!(progress.progress, 100.0);
}

#[tokio::test]
async fn store_rejects_mismatched_results() {
    let tmp = TempDir::new().unwrap();
    let (store, layout) = open(&tmp).await;
    let task_id = rating_task(&store, &layout).await;

    let err = store
        .save_annotation(&task_id, 0, &AnnotationResult::Text("great".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = store
        .save_annotation(&task_id, 3, &AnnotationResult::Rating(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = store
        .save_annotation("missing", 0, &AnnotationResult::Rating(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    assert_eq!(store.get_task_progress(&task_id).await.unwrap().completed, 0);
}

#[tokio::test]
async fn empty_task_has_zero_progress() {
    let tmp = TempDir::new().unwrap();
    let (store, _layout) = open(&tmp).await;

    let task_id = store
        .create_task(&NewTask {
            name: "empty".to_string(),
            description: String::new(),
            config: TaskConfig {
                field_configs: BTreeMap::new(),
                selected_fields: vec![],
                annotation_config: AnnotationConfig::TextInput {
                    placeholder: "Enter annotation".to_string(),
                    instruction: String::new(),
                },
                base_path: String::new(),
                total_items: 0,
            },
            data_path: "data/empty.jsonl".to_string(),
        })
        .await
        .unwrap();

    let progress = store.get_task_progress(&task_id).await.unwrap();
    assert_eq!((progress.total, progress.completed), (0, 0));
    assert_eq!(progress.progress, 0.0);
}
