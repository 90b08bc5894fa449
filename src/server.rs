//! HTTP boundary for duplicate lookups.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness check |
//! | `POST` | `/search` | `{summary, description}` → `{matches: [...]}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "input text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `model_mismatch` (500),
//! `embedding_failed` (502), `internal` (500). Bodies missing `summary` or
//! `description` are rejected by the JSON extractor before reaching the
//! query service.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser extensions
//! can call the service directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding;
use crate::error::DedupError;
use crate::models::{BugReport, Match};
use crate::query::QueryService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<QueryService>,
}

/// Load the artifact set, then serve until the process is terminated.
///
/// Fails before binding if the artifacts cannot be loaded or do not match
/// the configured embedder.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    let service = Arc::new(QueryService::open(config, embedder)?);

    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "dedup server listening");
    println!("dedup server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router around an opened [`QueryService`].
pub fn router(service: Arc<QueryService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_health))
        .route("/search", post(handle_search))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DedupError> for AppError {
    fn from(err: DedupError) -> Self {
        let (status, code) = match &err {
            DedupError::EmptyInput => (StatusCode::BAD_REQUEST, "bad_request"),
            DedupError::DimensionMismatch { .. } | DedupError::ModelMismatch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "model_mismatch")
            }
            DedupError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "search failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    issues: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        issues: state.service.len(),
    })
}

// ============ POST /search ============

#[derive(Serialize)]
struct SearchResponse {
    matches: Vec<Match>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(report): Json<BugReport>,
) -> Result<Json<SearchResponse>, AppError> {
    let matches = state.service.search(&report).await?;
    Ok(Json(SearchResponse { matches }))
}
