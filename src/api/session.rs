//! Session start / status / end endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::session::Phase;

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Media room the caller joined; logged for correlation only
    #[serde(default)]
    pub room_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub session_id: String,
    pub status: &'static str,
    pub phase: Phase,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub status: &'static str,
    pub phase: Phase,
    pub identifier_validated: bool,
    pub message_count: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    pub session_id: String,
    pub status: &'static str,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/{session_id}", get(status))
        .route("/{session_id}/end", post(end))
        .with_state(state)
}

async fn start(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<StartResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let session_id = match request.session_id {
        Some(id) if id.trim().is_empty() => {
            return Err(ApiError::BadRequest("session_id must not be blank"));
        }
        Some(id) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };

    tracing::info!(session_id = %session_id, room = ?request.room_name, "starting session");

    let session = state.registry.start(&session_id).await?;
    let snapshot = session.snapshot().await;

    Ok(Json(StartResponse {
        session_id,
        status: "active",
        phase: snapshot.phase,
    }))
}

async fn status(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let snapshot = state.registry.get(&session_id).await?.snapshot().await;

    Ok(Json(StatusResponse {
        session_id: snapshot.session_id,
        status: "active",
        phase: snapshot.phase,
        identifier_validated: snapshot.identifier_validated,
        message_count: snapshot.message_count,
        uptime_secs: snapshot.uptime.as_secs(),
    }))
}

async fn end(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
) -> Result<Json<EndResponse>, ApiError> {
    state.registry.end(&session_id).await?;

    Ok(Json(EndResponse {
        session_id,
        status: "ended",
    }))
}
