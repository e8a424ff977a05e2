//! HTTP handlers for the worker API
//!
//! - POST /tasks/backfill/schedule - Plan a sink's backfill and dispatch its units
//! - POST /tasks/backfill/execute - Run one signed (project, day) unit
//! - POST /tasks/discovery/tables - Run a tables-discovery cycle
//! - GET /health - Liveness
//! - GET /metrics - Prometheus text format
//!
//! Every task route requires `X-Lens-Signature`, the hex HMAC-SHA256 of the
//! raw body, and answers once the work is done. A non-2xx status makes the
//! queue redeliver the task, which the progress tracker makes safe.

use crate::metrics::{self, record_request};
use crate::security::{extract_signature, verify_signature, SIGNATURE_HEADER};
use crate::types::{
    DiscoveryRequest, DiscoveryResponse, ErrorResponse, ExecuteResponse, HealthResponse,
    ScheduleRequest, ScheduleResponse,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lens_core::BackfillTaskUnit;
use lens_runtime::{BackfillScheduler, TablesDiscovery, UnitExecutor};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<BackfillScheduler>,
    pub executor: Arc<UnitExecutor>,
    pub discovery: Arc<TablesDiscovery>,
    pub hmac_secret: String,
    /// Cancelled on shutdown so in-flight work stops between batches
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks/backfill/schedule", post(schedule_handler))
        .route("/tasks/backfill/execute", post(execute_handler))
        .route("/tasks/discovery/tables", post(discovery_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn schedule_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let started = Instant::now();
    let result = schedule(&state, &headers, &body).await;
    observe("schedule", started, &result);
    result
}

async fn schedule(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<ScheduleResponse>, ApiError> {
    authenticate(state, headers, body)?;
    let request: ScheduleRequest = parse_json(body)?;
    info!(sink_id = %request.sink_id, test_mode = request.test_mode, "Received schedule request");

    let outcome = state
        .scheduler
        .schedule_backfill(&request.sink_id, request.test_mode, &state.shutdown)
        .await?;
    Ok(Json(ScheduleResponse::new(request.sink_id, outcome)))
}

/// Execute one backfill unit
///
/// # Request Format
///
/// - Header: `X-Lens-Signature: <hex-encoded-hmac-sha256>`
/// - Body: Base64-encoded JSON task unit
pub async fn execute_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let started = Instant::now();
    let result = execute(&state, &headers, &body).await;
    observe("execute", started, &result);
    result
}

async fn execute(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<ExecuteResponse>, ApiError> {
    authenticate(state, headers, body)?;

    let decoded = STANDARD
        .decode(body)
        .map_err(|_| ApiError::BadRequest("Invalid base64 encoding".to_string()))?;
    let unit: BackfillTaskUnit = serde_json::from_slice(&decoded)
        .map_err(|e| ApiError::BadRequest(format!("Invalid task unit: {e}")))?;

    let mut outcome = state.executor.execute(&unit, &state.shutdown).await?;

    if let Some(cleanup) = outcome.cleanup.take() {
        let sink_id = unit.sink_id.clone();
        tokio::spawn(async move {
            match cleanup.await {
                Ok(deleted) => info!(sink_id = %sink_id, deleted, "Progress clean-up finished"),
                Err(e) => error!(sink_id = %sink_id, error = %e, "Progress clean-up task failed"),
            }
        });
    }

    Ok(Json(ExecuteResponse::new(unit, &outcome)))
}

pub async fn discovery_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DiscoveryResponse>, ApiError> {
    let started = Instant::now();
    let result = discover(&state, &headers, &body).await;
    observe("discovery", started, &result);
    result
}

async fn discover(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<DiscoveryResponse>, ApiError> {
    authenticate(state, headers, body)?;
    let request: DiscoveryRequest = parse_json(body)?;
    info!(tenant_id = %request.tenant_id, "Received discovery request");

    let outcome = state
        .discovery
        .run(&request.tenant_id, &request.destination_project, &state.shutdown)
        .await?;
    Ok(Json(DiscoveryResponse::new(request.tenant_id, outcome)))
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

/// Check `X-Lens-Signature` against the raw request body
fn authenticate(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let header_value = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let signature = extract_signature(header_value).map_err(|_| ApiError::MissingSignature)?;

    verify_signature(body, signature, &state.hmac_secret).map_err(|e| {
        warn!(error = %e, "Signature verification failed");
        ApiError::InvalidSignature
    })
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {e}")))
}

fn observe<T>(route: &str, started: Instant, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    record_request(route, status.as_u16(), started.elapsed().as_secs_f64());
}

/// Error types for the task routes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Runtime(#[from] lens_runtime::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingSignature | ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Runtime(lens_runtime::Error::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = match &self {
            ApiError::Runtime(e) => e.kind().map(|k| k.as_str().to_string()),
            _ => None,
        };
        match &self {
            ApiError::Runtime(e) => error!(error = %e, kind = ?kind, "Task failed"),
            ApiError::BadRequest(msg) => warn!(error = %msg, "Invalid payload received"),
            _ => {}
        }

        let body = ErrorResponse {
            error: self.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_core::ExternalError;

    #[test]
    fn test_api_error_statuses() {
        assert_eq!(ApiError::MissingSignature.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidSignature.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::BadRequest("x".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Runtime(lens_runtime::Error::Cancelled).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Runtime(ExternalError::forbidden("denied").into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.0.status, "healthy");
        assert!(!response.0.version.is_empty());
    }
}
