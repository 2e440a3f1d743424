use crate::collector::service::CollectorService;
use crate::transport::types::{SendBatchRequest, SendBatchResponse, TypesReply};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::sync::Arc;

/// Shared state for the collector API
pub struct CollectorState {
    pub service: CollectorService,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl CollectorState {
    pub fn new(service: CollectorService) -> Self {
        Self {
            service,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// POST /logs/batch
///
/// A storage failure is an ordinary rejection (`accepted: false`), not an HTTP error.
pub async fn send_batch(
    State(state): State<Arc<CollectorState>>,
    payload: Result<Json<SendBatchRequest>, JsonRejection>,
) -> Result<Json<SendBatchResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let accepted = state.service.send_batch(request.records).await;
    Ok(Json(SendBatchResponse { accepted }))
}

/// GET /logs/types
pub async fn list_types(State(state): State<Arc<CollectorState>>) -> Json<TypesReply> {
    Json(state.service.list_types().await)
}

/// GET /logs/types/:log_type/records
///
/// Newline-delimited JSON, one `StreamFrame` per line.
pub async fn stream_by_type(
    State(state): State<Arc<CollectorState>>,
    Path(log_type): Path<String>,
) -> Response {
    let frames = state.service.stream_by_type(log_type).map(|frame| {
        serde_json::to_string(&frame).map(|mut line| {
            line.push('\n');
            line
        })
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(frames),
    )
        .into_response()
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<CollectorState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
