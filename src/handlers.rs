use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::csv_ingestor::ingest_csv;
use crate::errors::{AppError, ResultExt};
use crate::extraction_service::ExtractionService;
use crate::gemini_client::ImagePayload;
use crate::models::*;
use crate::session::SessionStore;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Capture sessions, held in memory only.
    pub sessions: SessionStore,
    /// Remote extraction with retry and deadline.
    pub extractor: ExtractionService,
}

/// Builds the API router (without rate limiting, which needs peer addresses).
pub fn app_router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sessions", post(create_session))
        .route(
            "/api/v1/sessions/:id",
            get(get_session).delete(delete_session),
        )
        .route("/api/v1/sessions/:id/roster", post(upload_roster))
        .route("/api/v1/sessions/:id/clients", get(list_clients))
        .route("/api/v1/sessions/:id/selection", post(select_client))
        .route("/api/v1/sessions/:id/capture", post(capture))
        .route("/api/v1/sessions/:id/cancel", post(cancel_capture))
        .route("/api/v1/sessions/:id/result", get(get_result))
        .route("/api/v1/sessions/:id/reset", post(reset_session))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-crm-vision",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/sessions
///
/// Opens a new capture session at the upload step.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionView>) {
    let (_, session) = state.sessions.create().await;
    let view = session.lock().await.view();
    (StatusCode::CREATED, Json(view))
}

/// GET /api/v1/sessions/:id
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = state.sessions.get(id).await?;
    let view = session.lock().await.view();
    Ok(Json(view))
}

/// DELETE /api/v1/sessions/:id
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/:id/roster
///
/// Body is the raw CSV text. Replaces the session roster; an upload with no
/// usable client answers 422 and leaves the session on the upload step.
pub async fn upload_roster(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: String,
) -> Result<Json<UploadResponse>, AppError> {
    tracing::info!("POST /sessions/{}/roster - {} bytes", id, body.len());

    let session = state.sessions.get(id).await?;
    let report = ingest_csv(&body);

    let mut session = session.lock().await;
    session.load_roster(&report)?;

    Ok(Json(UploadResponse {
        session: session.view(),
        client_count: report.records.len(),
        skipped_count: report.skipped.len(),
        report,
    }))
}

/// GET /api/v1/sessions/:id/clients
pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ClientListItem>>, AppError> {
    let session = state.sessions.get(id).await?;
    let session = session.lock().await;
    let items = session
        .clients()
        .iter()
        .map(|record| ClientListItem {
            label: record.label(),
            record: record.clone(),
        })
        .collect();
    Ok(Json(items))
}

/// POST /api/v1/sessions/:id/selection
pub async fn select_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SelectClientRequest>,
) -> Result<Json<SessionView>, AppError> {
    let session = state.sessions.get(id).await?;
    let mut session = session.lock().await;
    session.select_client(&request.client_id)?;
    tracing::info!("Session {} selected client {}", id, request.client_id.trim());
    Ok(Json(session.view()))
}

/// POST /api/v1/sessions/:id/capture
///
/// Runs the extraction for the selected client. Only one extraction per
/// session may be in flight; the work runs on its own task so the session
/// always settles even if the caller goes away.
pub async fn capture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<ExtractionResponse>, AppError> {
    let image = ImagePayload::from_data_url(&request.image)?;
    let shared = state.sessions.get(id).await?;

    let ticket = shared.lock().await.begin_capture(image, Utc::now())?;
    tracing::info!(
        "Session {} capturing screen for client {}",
        id,
        ticket.client_id
    );

    let task_state = state.clone();
    let task_session = shared.clone();
    let handle = tokio::spawn(async move {
        let outcome = task_state
            .extractor
            .extract(&ticket.image, &ticket.client_id, ticket.captured_at)
            .await;
        task_session.lock().await.complete_capture(&outcome);
        outcome
    });

    let outcome = handle
        .await
        .map_err(|e| AppError::InternalError(format!("Extraction task failed: {}", e)))?;
    let result = outcome.with_context(|| format!("Capture for session {}", id))?;

    let view = shared.lock().await.view();
    Ok(Json(ExtractionResponse {
        session: view,
        summary: result.summary(),
        result,
    }))
}

/// POST /api/v1/sessions/:id/cancel
pub async fn cancel_capture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = state.sessions.get(id).await?;
    let mut session = session.lock().await;
    session.cancel_capture()?;
    Ok(Json(session.view()))
}

/// GET /api/v1/sessions/:id/result
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExtractionResponse>, AppError> {
    let session = state.sessions.get(id).await?;
    let session = session.lock().await;
    let result = session
        .result()
        .cloned()
        .ok_or_else(|| AppError::NotFound("No extraction result for this session".to_string()))?;

    Ok(Json(ExtractionResponse {
        session: session.view(),
        summary: result.summary(),
        result,
    }))
}

/// POST /api/v1/sessions/:id/reset
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = state.sessions.get(id).await?;
    let mut session = session.lock().await;
    session.reset()?;
    Ok(Json(session.view()))
}
