use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::SessionError;
use crate::orchestrator::{Orchestrator, PollResult};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub spec: String,
    #[serde(default, alias = "github_repo")]
    pub repo_hint: Option<String>,
}

#[derive(Deserialize)]
pub struct SuggestionRequest {
    pub session_id: String,
    pub suggestion: String,
}

#[derive(Deserialize)]
pub struct CommitRequest {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct SessionAccepted {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct CommitResponse {
    pub url: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let msg = err.to_string();
        match err {
            SessionError::Validation(_) => ApiError::BadRequest(msg),
            SessionError::NotFound { .. } => ApiError::NotFound(msg),
            SessionError::Conflict { .. } | SessionError::InvalidTransition { .. } => {
                ApiError::Conflict(msg)
            }
            SessionError::Commit(_) => ApiError::BadGateway(msg),
            SessionError::LockPoisoned => ApiError::Internal(msg),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/generate-project", post(generate_project))
        .route("/updates/{session_id}", get(get_updates))
        .route("/suggest-changes", post(suggest_changes))
        .route("/commit", post(commit))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({"message": "MACC API running - all good"}))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn generate_project(
    State(state): State<SharedState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<SessionAccepted>, ApiError> {
    let session_id = state
        .orchestrator
        .generate(&req.spec, req.repo_hint.as_deref())?;
    Ok(Json(SessionAccepted { session_id }))
}

async fn get_updates(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<PollResult>, ApiError> {
    Ok(Json(state.orchestrator.poll(&session_id)?))
}

async fn suggest_changes(
    State(state): State<SharedState>,
    Json(req): Json<SuggestionRequest>,
) -> Result<Json<SessionAccepted>, ApiError> {
    state
        .orchestrator
        .refine(&req.session_id, &req.suggestion)?;
    Ok(Json(SessionAccepted {
        session_id: req.session_id,
    }))
}

async fn commit(
    State(state): State<SharedState>,
    Json(req): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    let url = state
        .orchestrator
        .commit(&req.session_id)
        .await
        .inspect_err(|e| warn!(session_id = %req.session_id, error = %e, "commit rejected"))?;
    Ok(Json(CommitResponse { url }))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.session(&id)?))
}

async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.teardown(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────
