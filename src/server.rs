//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/embed` | Re-embed one source, note or insight |
//! | `POST` | `/api/embeddings/rebuild` | Submit a rebuild job |
//! | `GET`  | `/api/embeddings/rebuild/{id}/status` | Rebuild progress |
//! | `GET`  | `/api/commands/{id}` | Any job's ledger record |
//! | `POST` | `/api/sources/{id}/vectorize` | Submit a vectorization job |
//! | `GET`  | `/api/sources/{id}/status` | Embedded chunk count and job status |
//! | `POST` | `/api/context` | Assemble a token-bounded context |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Source 'source:x' not found" } }
//! ```
//!
//! | Kind | Status | Code |
//! |------|--------|------|
//! | `NotFound` | 404 | `not_found` |
//! | `InvalidInput` | 400 | `bad_request` |
//! | `NoEmbeddingModel` | 400 | `embeddings_disabled` |
//! | `Timeout` | 408 | `timeout` |
//! | `WriteConflict`, `Connection`, `Provider` | 503 | `unavailable` |
//! | anything else | 500 | `internal` |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use notebook_rag_core::commands::{self, RebuildEmbeddingsInput};
use notebook_rag_core::context::{
    build_mixed_context, build_notebook_context, build_source_context, ContextConfig,
    ContextResponse,
};
use notebook_rag_core::jobs::CommandContext;
use notebook_rag_core::models::RebuildMode;
use notebook_rag_core::{ErrorKind, PipelineError};

use crate::catalog::{self, RebuildStatus, RebuildSubmission, SourceStatus};
use crate::pipeline::Pipeline;

#[derive(Clone)]
struct AppState {
    ctx: CommandContext,
}

pub fn router(ctx: CommandContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/embed", post(handle_embed))
        .route("/api/embeddings/rebuild", post(handle_rebuild))
        .route(
            "/api/embeddings/rebuild/{id}/status",
            get(handle_rebuild_status),
        )
        .route("/api/commands/{id}", get(handle_command_status))
        .route("/api/sources/{id}/vectorize", post(handle_vectorize))
        .route("/api/sources/{id}/status", get(handle_source_status))
        .route("/api/context", post(handle_context))
        .layer(cors)
        .with_state(AppState { ctx })
}

/// Serve the API on `[server].bind` until the process exits.
pub async fn run_server(pipeline: &Pipeline) -> anyhow::Result<()> {
    let bind_addr = pipeline.config.server.bind.clone();
    let app = router(pipeline.ctx.clone());

    tracing::info!(addr = %bind_addr, "HTTP server listening");
    println!("nbrag server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
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

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match err.kind() {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "bad_request"),
            ErrorKind::NoEmbeddingModel => (StatusCode::BAD_REQUEST, "embeddings_disabled"),
            ErrorKind::Timeout => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            ErrorKind::WriteConflict | ErrorKind::Connection | ErrorKind::Provider => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
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

// ============ POST /api/embed ============

#[derive(Deserialize)]
struct EmbedRequest {
    item_id: String,
    item_type: String,
}

/// Re-embeds synchronously. The structured outcome is returned even when
/// `success` is false; only a missing provider is an HTTP error.
async fn handle_embed(
    State(state): State<AppState>,
    Json(req): Json<EmbedRequest>,
) -> Result<Json<commands::EmbedSingleItemOutput>, AppError> {
    state.ctx.embedder()?;
    let output = commands::embed_single_item(&state.ctx, &req.item_id, &req.item_type).await;
    Ok(Json(output))
}

// ============ Rebuild ============

/// Omitted fields mean mode `existing` and every item type.
#[derive(Deserialize, Default)]
#[serde(default)]
struct RebuildRequest {
    mode: Option<String>,
    include_sources: Option<bool>,
    include_notes: Option<bool>,
    include_insights: Option<bool>,
}

impl RebuildRequest {
    fn into_input(self) -> Result<RebuildEmbeddingsInput, PipelineError> {
        let mode = match self.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => RebuildMode::Existing,
        };
        Ok(RebuildEmbeddingsInput {
            mode,
            include_sources: self.include_sources.unwrap_or(true),
            include_notes: self.include_notes.unwrap_or(true),
            include_insights: self.include_insights.unwrap_or(true),
        })
    }
}

async fn handle_rebuild(
    State(state): State<AppState>,
    Json(req): Json<RebuildRequest>,
) -> Result<Json<RebuildSubmission>, AppError> {
    let input = req.into_input()?;
    if !(input.include_sources || input.include_notes || input.include_insights) {
        return Err(bad_request("At least one item type must be selected"));
    }
    Ok(Json(catalog::submit_rebuild(&state.ctx, &input).await?))
}

async fn handle_rebuild_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RebuildStatus>, AppError> {
    Ok(Json(catalog::rebuild_status(&state.ctx, &id).await?))
}

async fn handle_command_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state
        .ctx
        .queue
        .get_status(&id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Command '{}'", id)))?;
    Ok(Json(catalog::job_view(&job)))
}

// ============ Sources ============

#[derive(Serialize)]
struct VectorizeResponse {
    source_id: String,
    command_id: String,
}

async fn handle_vectorize(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VectorizeResponse>, AppError> {
    state.ctx.embedder()?;
    let command_id = commands::submit_vectorization(&state.ctx, &id).await?;
    Ok(Json(VectorizeResponse {
        source_id: id,
        command_id,
    }))
}

async fn handle_source_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceStatus>, AppError> {
    Ok(Json(catalog::source_status(&state.ctx, &id).await?))
}

// ============ POST /api/context ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct ContextRequest {
    notebook_id: Option<String>,
    source_id: Option<String>,
    source_ids: Vec<String>,
    note_ids: Vec<String>,
    context_config: Option<ContextConfig>,
    include_insights: Option<bool>,
    max_tokens: Option<usize>,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    let start = Instant::now();
    let ctx = &state.ctx;
    let store = ctx.store.as_ref();
    let max_tokens = req.max_tokens.or(ctx.settings.default_max_tokens);

    let weights = ctx.settings.priority_weights;

    let response = if let Some(source_id) = req.source_id.as_deref() {
        build_source_context(
            store,
            source_id,
            req.include_insights.unwrap_or(true),
            max_tokens,
            weights,
        )
        .await?
    } else if !req.source_ids.is_empty() || !req.note_ids.is_empty() {
        build_mixed_context(
            store,
            &req.source_ids,
            &req.note_ids,
            req.notebook_id.as_deref(),
            max_tokens,
            weights,
        )
        .await?
    } else if let Some(notebook_id) = req.notebook_id.as_deref() {
        build_notebook_context(store, notebook_id, req.context_config, max_tokens, weights).await?
    } else {
        return Err(bad_request(
            "One of notebook_id, source_id, source_ids or note_ids is required",
        ));
    };

    tracing::info!(
        total_items = response.total_items,
        total_tokens = response.total_tokens,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "context built"
    );
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild_request(body: &str) -> RebuildRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn empty_rebuild_request_means_existing_and_everything() {
        let input = rebuild_request("{}").into_input().unwrap();
        assert_eq!(input, RebuildEmbeddingsInput::new(RebuildMode::Existing));
    }

    #[test]
    fn rebuild_request_keeps_explicit_choices() {
        let input = rebuild_request(r#"{"mode": "all", "include_notes": false}"#)
            .into_input()
            .unwrap();
        assert_eq!(input.mode, RebuildMode::All);
        assert!(input.include_sources);
        assert!(!input.include_notes);
        assert!(input.include_insights);
    }

    #[test]
    fn unknown_rebuild_mode_is_a_bad_request() {
        let err = rebuild_request(r#"{"mode": "everything"}"#)
            .into_input()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("Invalid mode: everything"));

        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
