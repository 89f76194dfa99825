//! HTTP interface.
//!
//! `POST /execute` runs a snippet, `GET /health` reports liveness. Every
//! response to `/execute`, including rejections and internal errors, uses the
//! same JSON shape so callers only parse one thing.

use std::any::Any;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::backend::ExecutionBackend;
use crate::config::ServerConfig;
use crate::error::SandboxError;
use crate::normalize::{ExecutionResult, ExecutionStatus};
use crate::sandbox::{ExecutionRequest, Sandbox};

/// Inbound body of `POST /execute`. Fields are optional so that a missing
/// field is reported as a validation error rather than a parse error.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Body of every `/execute` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub output: String,
    pub error: String,
    pub status: ExecutionStatus,
    /// The identifier as submitted, not the resolved recipe name.
    pub language: String,
    pub timed_out: bool,
    pub timestamp: String,
}

impl ExecuteResponse {
    fn completed(result: ExecutionResult, language: String) -> Self {
        Self {
            output: result.output,
            error: result.error_detail,
            status: result.status,
            language,
            timed_out: result.timed_out,
            timestamp: timestamp(),
        }
    }

    fn rejected(message: String, language: String) -> Self {
        Self {
            output: String::new(),
            error: message,
            status: ExecutionStatus::Error,
            language,
            timed_out: false,
            timestamp: timestamp(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
}

/// A [`SandboxError`] plus the language echoed back in the response.
#[derive(Debug)]
pub struct ApiError {
    error: SandboxError,
    language: String,
}

impl ApiError {
    pub fn new(error: SandboxError, language: impl Into<String>) -> Self {
        Self {
            error,
            language: language.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(error = %self.error, "Request failed");
        } else {
            debug!(error = %self.error, "Request rejected");
        }

        let body = ExecuteResponse::rejected(self.error.public_message(), self.language);
        (status, Json(body)).into_response()
    }
}

/// ISO-8601 UTC timestamp with millisecond precision.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the application router with its middleware stack.
pub fn router<B: ExecutionBackend + 'static>(
    sandbox: Arc<Sandbox<B>>,
    server: &ServerConfig,
) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute::<B>))
        .with_state(sandbox)
        .layer(DefaultBodyLimit::max(server.body_limit_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http());

    if server.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: timestamp(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn execute<B: ExecutionBackend + 'static>(
    State(sandbox): State<Arc<Sandbox<B>>>,
    payload: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::new(reject_body(&rejection), ""))?;

    let submitted = body.language.clone().unwrap_or_default();
    let request = ExecutionRequest::new(body.code, body.language)
        .map_err(|e| ApiError::new(e, submitted.as_str()))?;

    let result = sandbox
        .execute(&request)
        .await
        .map_err(|e| ApiError::new(e, submitted.as_str()))?;

    info!(
        language = %request.language,
        status = ?result.status,
        timed_out = result.timed_out,
        "Execution finished"
    );

    Ok(Json(ExecuteResponse::completed(result, request.language)))
}

/// Map a JSON extraction failure. Oversized bodies and wrong content types
/// keep their own status; everything else is a plain bad request.
fn reject_body(rejection: &JsonRejection) -> SandboxError {
    let status = rejection.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE || status == StatusCode::UNSUPPORTED_MEDIA_TYPE {
        SandboxError::UnacceptableBody {
            status: status.as_u16(),
            message: rejection.body_text(),
        }
    } else {
        SandboxError::invalid_request(rejection.body_text())
    }
}

/// Render a caught panic as a generic 500.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::new(SandboxError::internal(format!("handler panicked: {detail}")), "").into_response()
}

/// Serve the router until Ctrl-C.
pub async fn serve<B: ExecutionBackend + 'static>(
    sandbox: Arc<Sandbox<B>>,
    server: &ServerConfig,
) -> anyhow::Result<()> {
    let addr = server.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "Starting HTTP server");

    axum::serve(listener, router(sandbox, server))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
