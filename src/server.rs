//! HTTP front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/response` | Answer a question, optionally over uploaded PDFs |
//! | `GET`  | `/health` | Liveness check |
//! | `GET`  | anything else | Static files from `[server].static_dir` |
//!
//! # Error Contract
//!
//! A missing question is answered with exactly
//! `{ "error": "No question provided" }` and status 400. Every other
//! failure carries a machine-readable code and, when an external service
//! is to blame, its name:
//!
//! ```json
//! { "error": "s3 unavailable: HTTP 403: ...", "code": "source_unavailable", "dependency": "s3" }
//! ```
//!
//! Internal errors are logged and reported with a generic message.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::app::Services;
use crate::error::RagError;
use crate::handler::{handle_ask, AskRequest, AskResponse};
use crate::pipeline::Pipeline;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Serve until Ctrl-C, then let in-flight requests finish.
pub async fn run_server(services: &Services) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(
        services.pipeline.clone(),
        &services.config.server.static_dir,
        services.config.server.max_body_bytes,
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    serve(listener, app, shutdown_signal()).await
}

/// Serve `app` on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

pub fn router(pipeline: Arc<Pipeline>, static_dir: &Path, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/response", post(handle_response))
        .route("/health", get(handle_health))
        .fallback_service(ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(AppState { pipeline })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dependency: Option<&'static str>,
}

struct AppError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match err {
            RagError::Validation(message) => ErrorBody {
                error: message,
                code: None,
                dependency: None,
            },
            RagError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                ErrorBody {
                    error: "internal server error".to_string(),
                    code: Some("internal"),
                    dependency: None,
                }
            }
            other => {
                tracing::error!(error = %other, "request failed");
                ErrorBody {
                    error: other.to_string(),
                    code: Some(other.code()),
                    dependency: other.dependency(),
                }
            }
        };
        AppError { status, body }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "bad_request"
        };
        AppError {
            status,
            body: ErrorBody {
                error: rejection.body_text(),
                code: Some(code),
                dependency: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    source: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "online",
        source: "S3-Bucket",
    })
}

// ============ POST /response ============

async fn handle_response(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(request) = payload.map_err(AppError::from)?;
    let response = handle_ask(&state.pipeline, request).await?;
    Ok(Json(response))
}
