//! HTTP control surface for the pipeline.
//!
//! Consumed by the dashboard layer: start and cancel batch runs, process or
//! reset individual documents, query status and default configuration, and
//! follow live progress over SSE.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/pipeline/start` | Start batch processing (optional config override body), returns session id |
//! | `POST` | `/pipeline/documents/{id}/process` | Process one document, returns its final status |
//! | `POST` | `/pipeline/cancel` | Cancel the active batch (between documents) |
//! | `POST` | `/pipeline/documents/{id}/reset` | Reset one document |
//! | `POST` | `/pipeline/reset` | Reset the corpus; body must carry the confirmation phrase |
//! | `GET`  | `/pipeline/status` | Per-status counts, chunk/index totals, session snapshot |
//! | `GET`  | `/pipeline/config` | The server's default pipeline configuration |
//! | `GET`  | `/pipeline/events` | SSE stream of pipeline events (no replay) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "pipeline_busy", "message": "pipeline busy: a session is already active" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `confirmation_required`
//! (400), `pipeline_busy` (409), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::{Config, PipelineConfig};
use crate::db;
use crate::events::EventBroadcaster;
use crate::migrate;
use crate::pipeline::{Pipeline, PipelineError};
use crate::reset::{ResetController, ResetError};
use crate::stats;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    reset: Arc<ResetController>,
}

/// Error envelope per the API contract.
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let message = e.to_string();
        match e {
            PipelineError::Busy => ApiError::new(StatusCode::CONFLICT, "pipeline_busy", message),
            PipelineError::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            PipelineError::InvalidConfig(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            PipelineError::Storage(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<ResetError> for ApiError {
    fn from(e: ResetError) -> Self {
        let message = e.to_string();
        match e {
            ResetError::Busy => ApiError::new(StatusCode::CONFLICT, "pipeline_busy", message),
            ResetError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "not_found", message),
            ResetError::ConfirmationRequired => {
                ApiError::new(StatusCode::BAD_REQUEST, "confirmation_required", message)
            }
            ResetError::Storage(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
    }
}

/// Start the control server. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let pipeline = Arc::new(Pipeline::new(
        pool,
        config.storage.root.clone(),
        EventBroadcaster::new(),
    ));
    let reset = Arc::new(ResetController::new(Arc::clone(&pipeline)));
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline,
        reset,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/pipeline/start", post(start_batch))
        .route("/pipeline/documents/{id}/process", post(process_document))
        .route("/pipeline/cancel", post(cancel_batch))
        .route("/pipeline/documents/{id}/reset", post(reset_document))
        .route("/pipeline/reset", post(reset_all))
        .route("/pipeline/status", get(pipeline_status))
        .route("/pipeline/config", get(pipeline_config))
        .route("/pipeline/events", get(pipeline_events))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let bind = &config.server.bind;
    info!("control server listening on {}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Optional config override: absent body means the server's file-loaded
/// defaults; a partial body is filled in by the option defaults.
fn effective_config(state: &AppState, body: Option<Json<PipelineConfig>>) -> PipelineConfig {
    match body {
        Some(Json(config)) => config,
        None => state.config.pipeline.clone(),
    }
}

async fn start_batch(
    State(state): State<AppState>,
    body: Option<Json<PipelineConfig>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = effective_config(&state, body);
    let session_id = state.pipeline.start_batch(config)?;
    Ok(Json(serde_json::json!({ "session_id": session_id })))
}

async fn process_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<PipelineConfig>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = effective_config(&state, body);
    let status = state.pipeline.process_document(id, &config).await?;
    let doc = state
        .pipeline
        .registry()
        .get(id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({
        "document_id": id,
        "status": status,
        "last_error": doc.and_then(|d| d.last_error),
    })))
}

async fn cancel_batch(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.pipeline.is_busy() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "no active session to cancel",
        ));
    }
    state.pipeline.cancel();
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

async fn reset_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.reset.reset_one(id).await?;
    Ok(Json(serde_json::json!({ "document_id": id, "status": "pending" })))
}

#[derive(Deserialize, Default)]
struct ResetAllRequest {
    #[serde(default)]
    confirm: String,
}

async fn reset_all(
    State(state): State<AppState>,
    body: Option<Json<ResetAllRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let total = state.reset.reset_all(&request.confirm).await?;
    Ok(Json(serde_json::json!({ "reset": total })))
}

async fn pipeline_status(
    State(state): State<AppState>,
) -> Result<Json<stats::PipelineStatus>, ApiError> {
    let status = stats::collect_status(state.pipeline.pool(), state.pipeline.session_snapshot())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(status))
}

async fn pipeline_config(State(state): State<AppState>) -> Json<PipelineConfig> {
    Json(state.config.pipeline.clone())
}

/// Live event stream. No replay: observers that connect late should query
/// `/pipeline/status` for the session snapshot first.
async fn pipeline_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.pipeline.events().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        // Lagged observers simply miss events; that is the contract.
        result
            .ok()
            .and_then(|event| Event::default().json_data(&event).ok())
            .map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
