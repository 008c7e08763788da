//! REST API: session/event metadata and the agent launcher.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use session_relay_store::{EventFilter, Record, StoreError};

use crate::{AppState, LaunchError};

/// API error rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => Self::NotFound("Session not found"),
            StoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<LaunchError> for ApiError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::AlreadyRunning => Self::BadRequest(e.to_string()),
            LaunchError::Spawn(_) | LaunchError::NoPid => Self::Internal(e.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Routes mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route(
            "/sessions/{id}",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/sessions/{id}/events", get(session_events))
        .route("/events", get(list_events).post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/agents/{session_id}/start", post(start_agent))
        .route("/agents/{session_id}/status", get(agent_status))
}

async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<Record>>> {
    Ok(Json(state.store.list_sessions().await?))
}

async fn create_session(
    State(state): State<AppState>,
    Json(fields): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<Record>)> {
    let record = state.store.create_session(fields).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Record>> {
    state
        .store
        .get_session(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Session not found"))
}

async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(fields): Json<Map<String, Value>>,
) -> ApiResult<Json<Record>> {
    Ok(Json(state.store.update_session(&id, fields).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Record>>> {
    Ok(Json(
        state.store.list_events(EventFilter::for_session(id)).await?,
    ))
}

async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> ApiResult<Json<Vec<Record>>> {
    Ok(Json(state.store.list_events(filter).await?))
}

async fn create_event(
    State(state): State<AppState>,
    Json(fields): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<Record>)> {
    let record = state.store.create_event(fields).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Record>> {
    state
        .store
        .get_event(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Event not found"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Started {
    status: &'static str,
    session_id: String,
    pid: u32,
}

async fn start_agent(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Started>> {
    let pid = state.agents.start(&session_id).await?;
    Ok(Json(Started {
        status: "started",
        session_id,
        pid,
    }))
}

#[derive(Debug, Serialize)]
struct AgentStatus {
    running: bool,
    pid: Option<u32>,
    registered: bool,
}

async fn agent_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<AgentStatus>> {
    let pid = state.agents.pid(&session_id).await;
    let stats = state
        .hub
        .stats()
        .await
        .ok_or_else(|| ApiError::Internal("Hub is not running".to_string()))?;
    Ok(Json(AgentStatus {
        running: pid.is_some(),
        pid,
        registered: stats.agents.contains(&session_id),
    }))
}
