//! HTTP Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use udaplay_core::{AgentError, Answer, Session, SessionId};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model_connected: bool,
    pub web_search_enabled: bool,
    pub games_indexed: usize,
    pub active_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Continue an existing session; a new one is started when absent
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub session_id: SessionId,
    pub answer: Answer,
}

#[derive(Debug, Serialize)]
pub struct SessionClosed {
    pub session_id: SessionId,
    pub title: String,
    pub turns: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn agent_error(err: &AgentError) -> ApiError {
    match err {
        AgentError::Session(msg) => api_error(StatusCode::BAD_REQUEST, msg.clone(), "INVALID_REQUEST"),
        AgentError::RateLimited(_) => api_error(StatusCode::TOO_MANY_REQUESTS, err.user_message(), "RATE_LIMITED"),
        AgentError::ProviderUnavailable(_) => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, err.user_message(), "MODEL_UNAVAILABLE")
        }
        _ => api_error(StatusCode::INTERNAL_SERVER_ERROR, err.user_message(), "AGENT_ERROR"),
    }
}

fn session_not_found(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("no session '{id}'"), "SESSION_NOT_FOUND")
}

// ============================================================================
// Routes
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/ask", post(ask_handler))
        .route("/api/sessions/{id}", get(get_session).delete(end_session))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        model_connected,
        web_search_enabled: state.web_search_enabled,
        games_indexed: state.games_indexed,
        active_sessions: state.controller.session_count().await,
    })
}

/// Run one research turn; a client that disconnects mid-turn leaves it recorded as cancelled
pub async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .map_or_else(SessionId::new, SessionId::from_string);

    let answer = state
        .controller
        .ask(&session_id, &payload.question)
        .await
        .map_err(|e| {
            tracing::error!(session = %session_id, error = %e, "ask failed");
            agent_error(&e)
        })?;

    tracing::info!(
        session = %session_id,
        status = ?answer.status,
        termination = %answer.termination,
        evidence = answer.evidence.len(),
        "question answered"
    );
    Ok(Json(AskResponse { session_id, answer }))
}

/// Full transcript of a live session
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Session>, ApiError> {
    state
        .controller
        .transcript(&SessionId::from_string(&id))
        .await
        .map(Json)
        .ok_or_else(|| session_not_found(&id))
}

/// Close a session and drop its short-term memory
pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionClosed>, ApiError> {
    let session = state
        .controller
        .end_session(&SessionId::from_string(&id))
        .await
        .ok_or_else(|| session_not_found(&id))?;

    Ok(Json(SessionClosed {
        title: session.title(),
        turns: session.turn_count(),
        session_id: session.id,
    }))
}
