//! HTTP server exposing the harmonization pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/batch-harmonize` | Harmonize a batch of controls |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/config` | Effective pipeline settings |
//! | `GET`  | `/cache/stats` | Embedding cache size, counters and sample keys |
//! | `POST` | `/cache/clear` | Empty the embedding cache |
//!
//! `POST /batch-harmonize` accepts either a bare array of controls or an
//! envelope:
//!
//! ```json
//! {
//!   "controls": [{"framework": "NIST", "control_id": "AC-2", "name": "...", "description": "..."}],
//!   "fast_mode": false,
//!   "org_context": {"industry": "Finance", "existing_controls": ["firewall configuration"]}
//! }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid request body: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::CacheStats;
use crate::config::{Config, ConfigSummary};
use crate::models::{BatchRequest, BatchResult};
use crate::pipeline::Harmonizer;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    harmonizer: Arc<Harmonizer>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let harmonizer = Arc::new(Harmonizer::from_config(config.clone())?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "harmonization server listening");
    axum::serve(listener, router(harmonizer)).await?;

    Ok(())
}

/// Build the application router around a shared pipeline.
pub fn router(harmonizer: Arc<Harmonizer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/batch-harmonize", post(handle_batch_harmonize))
        .route("/health", get(handle_health))
        .route("/config", get(handle_config))
        .route("/cache/stats", get(handle_cache_stats))
        .route("/cache/clear", post(handle_cache_clear))
        .layer(cors)
        .with_state(AppState { harmonizer })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (`"bad_request"`, `"internal"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /batch-harmonize ============

/// Handler for `POST /batch-harmonize`.
///
/// The body is parsed here rather than with the `Json` extractor so that
/// malformed payloads get the same error envelope as every other failure.
async fn handle_batch_harmonize(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BatchResult>, AppError> {
    let request: BatchRequest = serde_json::from_slice(&body).map_err(|e| {
        bad_request(format!(
            "invalid request body: {} (expected an array of controls or {{\"controls\": [...]}})",
            e
        ))
    })?;
    let (controls, fast_mode, org_context) = request.into_parts();

    let result = state
        .harmonizer
        .harmonize(controls, fast_mode, org_context)
        .await
        .map_err(|e| {
            tracing::error!(error = %format!("{:#}", e), "batch harmonization failed");
            internal(format!("{:#}", e))
        })?;

    Ok(Json(result))
}

// ============ GET /config ============

async fn handle_config(State(state): State<AppState>) -> Json<ConfigSummary> {
    Json(state.harmonizer.config().summary())
}

// ============ /cache ============

async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.harmonizer.cache().stats())
}

#[derive(Serialize)]
struct ClearResponse {
    status: String,
    removed: usize,
}

async fn handle_cache_clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let cache = state.harmonizer.cache();
    let removed = cache.len();
    cache.clear();
    tracing::info!(removed, "embedding cache cleared");
    Json(ClearResponse {
        status: "cleared".to_string(),
        removed,
    })
}
