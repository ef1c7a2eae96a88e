//! The HTTP/JSON surface (spec §6): typed handler functions and request/
//! response DTOs wired onto an `axum::Router` by the `meshguard-api` binary.
//! Business logic lives here; the binary only owns the listener.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::Orchestrator;
use crate::types::{AgentId, SessionId};

/// Shared handler state: a reference-counted orchestrator.
pub type ApiState = Arc<Orchestrator>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(ApiError { error: self.message })).into_response()
    }
}

pub struct ApiErrorResponse {
    status: StatusCode,
    message: String,
}

impl ApiErrorResponse {
    fn not_found(what: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: what.into() }
    }

    fn bad_request(what: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: what.into() }
    }

    fn internal(what: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: what.into() }
    }
}

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub id: AgentId,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub status: crate::types::AgentStatus,
    pub session_id: Option<SessionId>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// `GET /agents`
pub async fn list_agents(State(state): State<ApiState>) -> Json<Vec<AgentSummary>> {
    let workers = state.pool.active_workers();
    Json(
        workers
            .into_iter()
            .map(|w| {
                let status = state.supervisor.handle(&w.agent_id).map_or(crate::types::AgentStatus::Busy, |h| h.status());
                AgentSummary { id: w.agent_id, agent_type: w.task_type, status, session_id: w.session_id, started_at: w.started_at }
            })
            .collect(),
    )
}

/// `GET /agents/:id`
pub async fn get_agent(State(state): State<ApiState>, Path(agent_id): Path<String>) -> Result<Json<AgentSummary>, ApiErrorResponse> {
    let agent_id = AgentId::new(agent_id);
    let handle = state.supervisor.handle(&agent_id).ok_or_else(|| ApiErrorResponse::not_found("agent not found"))?;
    Ok(Json(AgentSummary {
        id: agent_id,
        agent_type: String::new(),
        status: handle.status(),
        session_id: handle.session_id.clone(),
        started_at: handle.started_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct AgentStatusResponse {
    pub alive: bool,
    pub status: crate::types::AgentStatus,
    pub queue_len: usize,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

/// `GET /agents/:id/status`
pub async fn get_agent_status(State(state): State<ApiState>, Path(agent_id): Path<String>) -> Result<Json<AgentStatusResponse>, ApiErrorResponse> {
    let agent_id = AgentId::new(agent_id);
    let handle = state.supervisor.handle(&agent_id).ok_or_else(|| ApiErrorResponse::not_found("agent not found"))?;
    let report = handle.get_status().await.map_err(|e| ApiErrorResponse::internal(e.to_string()))?;
    Ok(Json(AgentStatusResponse {
        alive: !handle.status().is_terminal(),
        status: report.status,
        queue_len: report.queue_len,
        last_activity: chrono::Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub settings: Value,
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<ApiState>) -> Json<Vec<SessionId>> {
    Json(state.sessions.list_sessions())
}

/// `POST /sessions`
pub async fn create_session(State(state): State<ApiState>, Json(req): Json<CreateSessionRequest>) -> Json<SessionSummary> {
    let session_id = SessionId::new(uuid::Uuid::new_v4().to_string());
    state.sessions.create_session(session_id.clone(), req.user_id.clone(), req.settings);
    Json(SessionSummary { id: session_id, user_id: req.user_id })
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub id: SessionId,
    pub user_id: String,
    pub settings: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// `GET /sessions/:id`
pub async fn get_session(State(state): State<ApiState>, Path(session_id): Path<String>) -> Result<Json<SessionDetail>, ApiErrorResponse> {
    let session_id = SessionId::new(session_id);
    let (user_id, settings, created_at) =
        state.sessions.session_metadata(&session_id).ok_or_else(|| ApiErrorResponse::not_found("session not found"))?;
    Ok(Json(SessionDetail { id: session_id, user_id, settings, created_at }))
}

/// `DELETE /sessions/:id`
pub async fn delete_session(State(state): State<ApiState>, Path(session_id): Path<String>) -> Result<StatusCode, ApiErrorResponse> {
    let session_id = SessionId::new(session_id);
    state.sessions.stop_session(&session_id).await.map_err(|e| ApiErrorResponse::not_found(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: Value,
}

#[derive(Debug, Serialize)]
pub struct ProcessingResponse {
    pub status: &'static str,
}

/// `POST /sessions/:id/messages`
pub async fn post_session_message(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<ProcessingResponse>, ApiErrorResponse> {
    let session_id = SessionId::new(session_id);
    if state.sessions.session_metadata(&session_id).is_none() {
        return Err(ApiErrorResponse::not_found("session not found"));
    }
    let _ = req.message;
    let _ = state.event_bus.get_emitter().emit(crate::event_bus::Event::Session(crate::event_bus::SessionEvent {
        session_id,
        kind: crate::event_bus::SessionEventKind::MessageAdded,
    }));
    Ok(Json(ProcessingResponse { status: "processing" }))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: Value,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub result: Value,
    pub status: &'static str,
}

/// `POST /sessions/:id/commands`
pub async fn post_session_command(
    State(_state): State<ApiState>,
    Path(_session_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Json<CommandResponse> {
    Json(CommandResponse { result: req.command, status: "accepted" })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_ms: u64,
    pub agents: usize,
    pub sessions: usize,
    pub report: crate::metrics::HealthReport,
}

/// `GET /health`
pub async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let report = state.metrics.health_report();
    Json(HealthResponse {
        status: if report.overall >= 50.0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_ms: 0,
        agents: state.pool.active_count(),
        sessions: state.sessions.list_sessions().len(),
        report,
    })
}

/// `GET /.well-known/jwks.json` (SPEC_FULL §11 supplemental).
pub async fn get_jwks(State(state): State<ApiState>) -> Json<Value> {
    Json(state.key_manager.jwks())
}

/// Build the router wiring every handler in spec §6 plus the JWKS
/// supplemental endpoint.
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/:id", get(get_agent))
        .route("/agents/:id/status", get(get_agent_status))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/messages", post(post_session_message))
        .route("/sessions/:id/commands", post(post_session_command))
        .route("/health", get(get_health))
        .route("/.well-known/jwks.json", get(get_jwks))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
