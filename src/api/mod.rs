//! HTTP API server for voicedesk

pub mod health;
pub mod session;
pub mod token;
pub mod websocket;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::LiveKitConfig;
use crate::session::SessionRegistry;

/// Shared state for API handlers
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub livekit: LiveKitConfig,
    pub cors_permissive: bool,
}

/// API errors rendered as `{ "error": { "code", "message" } }`
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Duplicate(String),
    StartFailed(String),
    BadRequest(&'static str),
    NotConfigured(&'static str),
    Internal(String),
}

impl From<crate::Error> for ApiError {
    fn from(error: crate::Error) -> Self {
        match error {
            crate::Error::SessionNotFound(_) => Self::NotFound(error.to_string()),
            crate::Error::DuplicateSession(_) => Self::Duplicate(error.to_string()),
            e if e.is_provider() => Self::StartFailed(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Duplicate(msg) => (StatusCode::CONFLICT, "duplicate_session", msg),
            Self::StartFailed(msg) => (StatusCode::BAD_GATEWAY, "session_start_failed", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
            Self::NotConfigured(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "not_configured", msg.to_string())
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors_permissive = state.cors_permissive;

    let mut app = Router::new()
        .nest("/api/session", session::router(Arc::clone(&state)))
        .nest("/api/token", token::router(Arc::clone(&state)))
        .nest("/ws", websocket::router(Arc::clone(&state)))
        .merge(health::router(state));

    if cors_permissive {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: Arc<ApiState>, host: String, port: u16) -> Self {
        Self { state, host, port }
    }

    /// Serve until Ctrl-C, then shut every session down
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(addr = %addr, "API server listening");

        let registry = Arc::clone(&self.state.registry);
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        registry.shutdown_all().await;
        tracing::info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
