//! Inbound HTTP trigger.
//!
//! Runs one sync cycle per request instead of on a timer.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/salesforce-etl` | Run one cycle synchronously and report counts |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Response Contract
//!
//! Success, including the nothing-to-sync case:
//!
//! ```json
//! { "message": "ETL completed: 3 articles extracted, 2 documents upserted", "extracted": 3, "loaded": 2 }
//! ```
//!
//! Failure (`500`), with the upstream status and body when the upsert API
//! rejected the batch:
//!
//! ```json
//! { "message": "Upsert failed with status 503: upstream busy" }
//! ```
//!
//! Requests are serialized: a request that arrives while a cycle is running
//! waits for it to finish before starting its own.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::pipeline::{log_report, CycleError, Pipeline};
use crate::upsert::UpsertError;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Mutex<Pipeline>>,
}

/// Start the trigger server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "ETL trigger listening");
    serve(listener, pipeline).await
}

/// Serve the trigger endpoints on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, pipeline: Pipeline) -> anyhow::Result<()> {
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

pub fn router(pipeline: Pipeline) -> Router {
    let state = AppState {
        pipeline: Arc::new(Mutex::new(pipeline)),
    };
    Router::new()
        .route("/salesforce-etl", post(handle_etl))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Responses ============

#[derive(Serialize)]
struct EtlResponse {
    message: String,
    extracted: usize,
    loaded: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

/// A failed cycle rendered as a 500.
struct AppError {
    message: String,
}

impl From<CycleError> for AppError {
    fn from(err: CycleError) -> Self {
        let message = match err.cause.downcast_ref::<UpsertError>() {
            Some(rejected) if matches!(rejected, UpsertError::Rejected { .. }) => rejected.to_string(),
            _ => format!("ETL {}", err),
        };
        AppError { message }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

// ============ POST /salesforce-etl ============

async fn handle_etl(State(state): State<AppState>) -> Result<Json<EtlResponse>, AppError> {
    let mut pipeline = state.pipeline.lock().await;
    let report = pipeline.run_cycle().await.map_err(|e| {
        tracing::error!(stage = %e.stage, error = %e, "triggered cycle failed");
        AppError::from(e)
    })?;
    log_report(&report);

    let message = if report.nothing_to_do() {
        "No new articles to sync".to_string()
    } else {
        format!(
            "ETL completed: {} articles extracted, {} documents upserted",
            report.extracted, report.loaded
        )
    };

    Ok(Json(EtlResponse {
        message,
        extracted: report.extracted,
        loaded: report.loaded,
    }))
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
