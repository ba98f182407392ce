//! HTTP API: the same pipeline as the CLI behind three routes.
//!
//! - `POST /query`  — answer a question with sources
//! - `POST /ingest` — batch-ingest knowledge items
//! - `GET  /health` — liveness plus item count
//!
//! Errors leave as a JSON envelope `{"error": {"code", "message",
//! "retryable"}}` with a status code derived from the error kind, so
//! clients can branch on `code` and back off on `retryable` without
//! parsing messages.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::engine;
use crate::error::EngineError;
use crate::ingest;
use crate::models::{IngestRecord, QueryRequest};
use crate::retrieve::Mode;
use crate::synthesize::Synthesizer;
use crate::vector_store::VectorStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(query_handler))
        .route("/ingest", post(ingest_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run_server(pool: SqlitePool, config: Config) -> anyhow::Result<()> {
    let synthesizer: Arc<dyn Synthesizer> =
        Arc::from(crate::synthesize::create_synthesizer(&config.synthesis)?);
    let bind = config.server.bind.clone();
    let state = AppState {
        pool,
        config: Arc::new(config),
        synthesizer,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "scout api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, AppError> {
    let response = engine::answer_query(
        &state.pool,
        &state.config,
        state.synthesizer.as_ref(),
        &request,
        Mode::Hybrid,
    )
    .await?;
    Ok(Json(response).into_response())
}

async fn ingest_handler(
    State(state): State<AppState>,
    Json(records): Json<Vec<IngestRecord>>,
) -> Result<Response, AppError> {
    let outcomes = ingest::run_ingest(&state.pool, &state.config, records).await?;
    Ok(Json(serde_json::json!({ "outcomes": outcomes })).into_response())
}

async fn health_handler(State(state): State<AppState>) -> Result<Response, AppError> {
    let store = VectorStore::new(state.pool.clone(), 0);
    let items = store.count().await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "items": items,
    }))
    .into_response())
}

/// Error wrapper carrying the HTTP mapping of [`EngineError`].
pub struct AppError(EngineError);

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = classify(&self.0);
        let body = Json(serde_json::json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
                "retryable": self.0.is_retryable()
            }
        }));
        (status, body).into_response()
    }
}

/// Map an error to its HTTP status and stable client-facing code.
fn classify(err: &EngineError) -> (StatusCode, &'static str) {
    match err {
        EngineError::DimensionMismatch { .. } => (StatusCode::BAD_REQUEST, "dimension_mismatch"),
        EngineError::ContentTooLarge { .. } => (StatusCode::BAD_REQUEST, "content_too_large"),
        EngineError::EmptyText => (StatusCode::BAD_REQUEST, "empty_text"),
        EngineError::BatchTooLarge { .. } => (StatusCode::BAD_REQUEST, "batch_too_large"),
        EngineError::Config(_) => (StatusCode::BAD_REQUEST, "config"),
        EngineError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, "timeout"),
        EngineError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        EngineError::Synthesis(_) => (StatusCode::BAD_GATEWAY, "synthesis"),
        EngineError::Storage(_) | EngineError::Http(_) | EngineError::Json(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_bad_request() {
        for err in [
            EngineError::EmptyText,
            EngineError::DimensionMismatch {
                expected: 3,
                actual: 2,
            },
            EngineError::ContentTooLarge { len: 10, max: 5 },
            EngineError::BatchTooLarge { len: 200, max: 100 },
        ] {
            assert_eq!(classify(&err).0, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_retryable_errors_are_503() {
        let err = EngineError::ServiceUnavailable {
            service: "embedding",
            attempts: 6,
            reason: "rate limited".into(),
        };
        let (status, code) = classify(&err);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "service_unavailable");
    }

    #[test]
    fn test_timeout_is_408() {
        assert_eq!(
            classify(&EngineError::Timeout("embedding call")).0,
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn test_envelope_retryability_tracks_error_kind() {
        let backoff_worthy = EngineError::ServiceUnavailable {
            service: "synthesis",
            attempts: 4,
            reason: "502".into(),
        };
        assert!(backoff_worthy.is_retryable());
        assert_eq!(classify(&backoff_worthy).0, StatusCode::SERVICE_UNAVAILABLE);

        assert!(EngineError::Timeout("synthesis call").is_retryable());

        let terminal = EngineError::Synthesis("model refused".into());
        assert!(!terminal.is_retryable());
        assert!(!EngineError::EmptyText.is_retryable());
    }

    #[test]
    fn test_synthesis_failure_is_bad_gateway() {
        assert_eq!(
            classify(&EngineError::Synthesis("model refused".into())).0,
            StatusCode::BAD_GATEWAY
        );
    }
}
