//! Local HTTP JSON server.
//!
//! Drives one annotation [`Session`] for a single user on the local machine.
//! The session sits behind a `tokio::sync::Mutex`, so each request runs to
//! completion before the next one observes the session.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tasks` | Task counts and per-task progress |
//! | `GET`  | `/tasks/{id}` | One task with its config |
//! | `GET`  | `/tasks/{id}/progress` | Completion of one task |
//! | `GET`  | `/tasks/{id}/asset?field=&index=` | Raw bytes of an image or PDF field |
//! | `GET`  | `/session` | Where the session stands |
//! | `POST` | `/session/upload` | Parse a JSONL dataset |
//! | `POST` | `/session/fields` | Choose and type displayed fields |
//! | `POST` | `/session/annotation` | Choose the annotation input |
//! | `POST` | `/session/advance`, `/session/back` | Configuration steps |
//! | `POST` | `/session/create` | Persist the configured task |
//! | `POST` | `/session/open` | Annotate an existing task |
//! | `GET`  | `/session/view` | Current record, control and progress |
//! | `POST` | `/session/next`, `/session/prev`, `/session/jump` | Record navigation |
//! | `POST` | `/session/submit` | Save a result and move on |
//! | `POST` | `/session/review` | Progress of the current task |
//! | `POST` | `/session/export` | Export results to `test_data/reports/` |
//! | `POST` | `/session/reset` | Discard the session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "select at least one field" } }
//! ```
//!
//! Error codes: `parse_error` (400), `validation_error` (400), `not_found` (404),
//! `missing_resource` (404), `persistence_error` (500), `internal` (500).
//! Database failures are logged and reported with a generic message. A body
//! that is not valid JSON for the route is a `validation_error`.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::AppError;
use crate::export::{ExportOptions, ExportOutput};
use crate::jsonl::{self, PathReport};
use crate::layout::Layout;
use crate::models::{AnnotationConfig, AnnotationResult, FieldConfig, Task, TaskProgress};
use crate::render::{self, value_text};
use crate::stats::{self, Overview};
use crate::store::Store;
use crate::workflow::{RecordView, Session, SessionSummary};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<Store>,
    layout: Layout,
    session: Arc<Mutex<Session>>,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        let layout = Layout::new(&config.workspace.root);
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            layout,
            session: Arc::new(Mutex::new(Session::new())),
        }
    }
}

/// Builds the router with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tasks", get(handle_tasks))
        .route("/tasks/{id}", get(handle_task))
        .route("/tasks/{id}/progress", get(handle_task_progress))
        .route("/tasks/{id}/asset", get(handle_asset))
        .route("/session", get(handle_session))
        .route("/session/upload", post(handle_upload))
        .route("/session/fields", post(handle_fields))
        .route("/session/annotation", post(handle_annotation))
        .route("/session/advance", post(handle_advance))
        .route("/session/back", post(handle_back))
        .route("/session/create", post(handle_create))
        .route("/session/open", post(handle_open))
        .route("/session/view", get(handle_view))
        .route("/session/next", post(handle_next))
        .route("/session/prev", post(handle_prev))
        .route("/session/jump", post(handle_jump))
        .route("/session/submit", post(handle_submit))
        .route("/session/review", post(handle_review))
        .route("/session/export", post(handle_export))
        .route("/session/reset", post(handle_reset))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the server on `[server].bind` and runs until the process ends.
///
/// Applies the schema and creates the working directory layout first, so
/// the server can start against a fresh directory.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(config).await?;
    let state = AppState::new(config.clone(), store);
    state.layout.ensure()?;

    let app = build_router(state);
    let bind_addr = config.server.bind.clone();
    tracing::info!(%bind_addr, "annotation server listening");
    println!("Annotation server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// [`AppError`] as an HTTP response.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            AppError::Parse { .. } | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } | AppError::MissingResource { .. } => StatusCode::NOT_FOUND,
            AppError::Persistence(_)
            | AppError::Encoding(_)
            | AppError::Io { .. }
            | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            AppError::Persistence(_) | AppError::Encoding(_) => {
                tracing::error!(error = %err, "storage failure");
                "the annotation database could not complete the request".to_string()
            }
            _ => err.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: err.code().to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(AppError::validation(rejection.body_text()))
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// `Json` body extractor whose rejection uses the error contract above.
struct JsonBody<T>(T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /tasks ============

async fn handle_tasks(State(state): State<AppState>) -> ApiResult<Overview> {
    Ok(Json(stats::overview(&state.store).await?))
}

async fn handle_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Task> {
    Ok(Json(state.store.require_task(&id).await?))
}

async fn handle_task_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TaskProgress> {
    Ok(Json(state.store.get_task_progress(&id).await?))
}

#[derive(Deserialize)]
struct AssetQuery {
    field: String,
    index: u64,
}

/// Raw bytes of the file a record field points at, for PDF download or
/// full-size image display.
async fn handle_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<AssetQuery>,
) -> Result<Response, ApiError> {
    let task = state.store.require_task(&id).await?;
    let records = jsonl::load_file(std::path::Path::new(&task.data_path))?;
    let record = records
        .get(q.index as usize)
        .ok_or_else(|| AppError::not_found("record", q.index.to_string()))?;
    let value = record
        .get(&q.field)
        .ok_or_else(|| AppError::not_found("field", q.field.clone()))?;

    let asset = render::read_asset(&task.config.base_path, &value_text(value))?;
    let disposition = format!("inline; filename=\"{}\"", asset.file_name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, asset.mime),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        asset.bytes,
    )
        .into_response())
}

// ============ /session: configuring ============

async fn handle_session(State(state): State<AppState>) -> Json<SessionSummary> {
    Json(state.session.lock().await.summary())
}

#[derive(Deserialize)]
struct UploadRequest {
    content: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    base_path: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    records: usize,
    fields: Vec<String>,
    path_report: PathReport,
}

async fn handle_upload(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<UploadRequest>,
) -> ApiResult<UploadResponse> {
    let mut session = state.session.lock().await;
    let records = session.upload(&req.content, req.file_name.as_deref())?;
    if let Some(base) = &req.base_path {
        session.set_base_path(base);
    }
    Ok(Json(UploadResponse {
        records,
        fields: session.draft().available_fields(),
        path_report: session.path_report(),
    }))
}

#[derive(Deserialize)]
struct FieldsRequest {
    selected: Vec<String>,
    #[serde(default)]
    field_configs: BTreeMap<String, FieldConfig>,
}

#[derive(Serialize)]
struct FieldsResponse {
    session: SessionSummary,
    path_report: PathReport,
}

async fn handle_fields(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<FieldsRequest>,
) -> ApiResult<FieldsResponse> {
    let mut session = state.session.lock().await;
    session.select_fields(req.selected, req.field_configs)?;
    Ok(Json(FieldsResponse {
        session: session.summary(),
        path_report: session.path_report(),
    }))
}

async fn handle_annotation(
    State(state): State<AppState>,
    JsonBody(config): JsonBody<AnnotationConfig>,
) -> ApiResult<SessionSummary> {
    let mut session = state.session.lock().await;
    session.configure_annotation(config)?;
    Ok(Json(session.summary()))
}

async fn handle_advance(State(state): State<AppState>) -> ApiResult<SessionSummary> {
    let mut session = state.session.lock().await;
    session.advance()?;
    Ok(Json(session.summary()))
}

async fn handle_back(State(state): State<AppState>) -> ApiResult<SessionSummary> {
    let mut session = state.session.lock().await;
    session.back()?;
    Ok(Json(session.summary()))
}

#[derive(Deserialize)]
struct CreateRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Serialize)]
struct CreateResponse {
    task_id: String,
    view: RecordView,
}

async fn handle_create(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateRequest>,
) -> ApiResult<CreateResponse> {
    let mut session = state.session.lock().await;
    let task_id = session
        .create_task(&state.store, &state.layout, &req.name, &req.description)
        .await?;
    let view = session.current_view(&state.store).await?;
    Ok(Json(CreateResponse { task_id, view }))
}

// ============ /session: annotating ============

#[derive(Deserialize)]
struct OpenRequest {
    task_id: String,
}

async fn handle_open(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<OpenRequest>,
) -> ApiResult<RecordView> {
    let mut session = state.session.lock().await;
    session.open_task(&state.store, &req.task_id).await?;
    Ok(Json(session.current_view(&state.store).await?))
}

async fn handle_view(State(state): State<AppState>) -> ApiResult<RecordView> {
    let session = state.session.lock().await;
    Ok(Json(session.current_view(&state.store).await?))
}

async fn handle_next(State(state): State<AppState>) -> ApiResult<RecordView> {
    let mut session = state.session.lock().await;
    session.next()?;
    Ok(Json(session.current_view(&state.store).await?))
}

async fn handle_prev(State(state): State<AppState>) -> ApiResult<RecordView> {
    let mut session = state.session.lock().await;
    session.prev()?;
    Ok(Json(session.current_view(&state.store).await?))
}

#[derive(Deserialize)]
struct JumpRequest {
    index: u64,
}

async fn handle_jump(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<JumpRequest>,
) -> ApiResult<RecordView> {
    let mut session = state.session.lock().await;
    session.jump(req.index)?;
    Ok(Json(session.current_view(&state.store).await?))
}

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    value: Value,
}

#[derive(Serialize)]
struct SubmitResponse {
    saved: AnnotationResult,
    view: RecordView,
}

async fn handle_submit(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SubmitRequest>,
) -> ApiResult<SubmitResponse> {
    let mut session = state.session.lock().await;
    let saved = session.submit(&state.store, &req.value).await?;
    let view = session.current_view(&state.store).await?;
    Ok(Json(SubmitResponse { saved, view }))
}

// ============ /session: review and export ============

async fn handle_review(State(state): State<AppState>) -> ApiResult<TaskProgress> {
    let mut session = state.session.lock().await;
    Ok(Json(session.review(&state.store).await?))
}

async fn handle_export(
    State(state): State<AppState>,
    JsonBody(options): JsonBody<ExportOptions>,
) -> ApiResult<ExportOutput> {
    let mut session = state.session.lock().await;
    Ok(Json(
        session
            .export(&state.store, &state.layout, &options)
            .await?,
    ))
}

async fn handle_reset(State(state): State<AppState>) -> Json<SessionSummary> {
    let mut session = state.session.lock().await;
    session.reset();
    tracing::info!(db = %state.config.db.path.display(), "session reset");
    Json(session.summary())
}
