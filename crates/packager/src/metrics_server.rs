//! HTTP server for the HLS packager service
//!
//! Accepts packaging jobs and exposes metrics for monitoring tools.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::daemon::PackageRequest;
use crate::layout::validate_output_name;
use crate::metrics::{MetricsSnapshot, SharedMetrics};

/// Errors that can occur when running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address {addr}: {source}")]
    BindError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server stopped: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Shared state for the router
#[derive(Clone)]
pub struct AppState {
    pub metrics: SharedMetrics,
    pub jobs: mpsc::Sender<PackageRequest>,
}

/// Body of `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub input_path: PathBuf,
    pub output_name: String,
}

/// Body of a `202 Accepted` reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobAccepted {
    pub id: String,
}

/// Body of an error reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Handler for GET /metrics endpoint
/// Returns the current MetricsSnapshot as JSON
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let snapshot = state.metrics.read().await.clone();
    Json(snapshot)
}

/// Handler for POST /jobs
///
/// Queues the job without waiting for it; 503 when the queue is full.
async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    validate_output_name(&body.output_name)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let id = uuid::Uuid::new_v4().to_string();
    let request = PackageRequest {
        id: id.clone(),
        input_path: body.input_path,
        output_name: body.output_name,
    };

    // Count before sending so the run loop never decrements first
    state.metrics.write().await.queue_len += 1;

    if let Err(e) = state.jobs.try_send(request) {
        let mut metrics = state.metrics.write().await;
        metrics.queue_len = metrics.queue_len.saturating_sub(1);
        return Err(match e {
            TrySendError::Full(_) => {
                tracing::warn!("Job queue full, rejecting request");
                api_error(StatusCode::SERVICE_UNAVAILABLE, "job queue is full")
            }
            TrySendError::Closed(_) => {
                api_error(StatusCode::SERVICE_UNAVAILABLE, "service is shutting down")
            }
        });
    }

    tracing::info!(job_id = %id, "Job accepted");
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { id })))
}

/// Creates the axum Router with job and metrics endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/jobs", post(submit_job))
        .with_state(state)
}

/// Bind the listening socket
pub async fn bind_listener(bind_addr: &str) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|source| ServerError::BindError {
            addr: bind_addr.to_string(),
            source,
        })?;
    tracing::info!(addr = bind_addr, "HTTP server listening");
    Ok(listener)
}

/// Serve the router on an already bound listener until it fails
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    axum::serve(listener, create_router(state))
        .await
        .map_err(ServerError::Serve)
}

/// Runs the HTTP server on `bind_addr` until it fails
pub async fn run_server(state: AppState, bind_addr: &str) -> Result<(), ServerError> {
    let listener = bind_listener(bind_addr).await?;
    serve(listener, state).await
}
