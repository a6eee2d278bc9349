//! Image mapping and deployment lifecycle handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use fleet_state::RecordKey;

use crate::ApiState;
use crate::response::{ApiError, ApiResponse};

pub const DEFAULT_LOG_TAIL: usize = 100;
pub const MAX_LOG_TAIL: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct AddImageRequest {
    pub asset_id: String,
    pub image_name: String,
    #[serde(default)]
    pub host_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub tail: Option<usize>,
}

fn record_key((exercise_id, asset_id, image_id): (String, String, String)) -> RecordKey {
    RecordKey::new(exercise_id, asset_id, image_id)
}

// ── Image mappings ─────────────────────────────────────────────

/// GET /api/v1/exercises/:ex/images
pub async fn list_images(State(state): State<ApiState>, Path(exercise_id): Path<String>) -> impl IntoResponse {
    let images = state.orchestrator.images(&exercise_id).await;
    ApiResponse::ok(format!("{} images mapped", images.len()), images)
}

/// POST /api/v1/exercises/:ex/images
pub async fn add_image(
    State(state): State<ApiState>,
    Path(exercise_id): Path<String>,
    Json(request): Json<AddImageRequest>,
) -> impl IntoResponse {
    let added = state
        .orchestrator
        .add_image(
            &exercise_id,
            &request.asset_id,
            &request.image_name,
            request.host_id.as_deref(),
        )
        .await;
    match added {
        Ok(record) => (
            StatusCode::CREATED,
            ApiResponse::ok(format!("image {} mapped", record.image), record),
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// DELETE /api/v1/exercises/:ex/images/:asset/:image
pub async fn remove_image(
    State(state): State<ApiState>,
    Path(parts): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = record_key(parts);
    match state.orchestrator.remove_image(&key).await {
        Ok(()) => ApiResponse::ok(format!("image mapping {key} removed"), key).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// GET /api/v1/exercises/:ex/deployments
pub async fn list_records(State(state): State<ApiState>, Path(exercise_id): Path<String>) -> impl IntoResponse {
    let records = state.orchestrator.records(&exercise_id).await;
    ApiResponse::ok(format!("{} deployment records", records.len()), records)
}

/// GET /api/v1/deployments/:ex/:asset/:image
pub async fn deployment_status(
    State(state): State<ApiState>,
    Path(parts): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = record_key(parts);
    match state.orchestrator.status(&key).await {
        Ok(status) => {
            let message = format!("{key} is {}", status.record.state);
            ApiResponse::ok(message, status).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/deployments/:ex/:asset/:image/deploy
///
/// Answers `202 Accepted` with the record in `DEPLOYING`; the outcome is
/// observed through the status endpoint.
pub async fn deploy(
    State(state): State<ApiState>,
    Path(parts): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = record_key(parts);
    match state.orchestrator.deploy(&key).await {
        Ok(record) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(format!("deploy of {key} started"), record),
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/deployments/:ex/:asset/:image/stop
pub async fn stop(
    State(state): State<ApiState>,
    Path(parts): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = record_key(parts);
    match state.orchestrator.stop(&key).await {
        Ok(record) => ApiResponse::ok(format!("{key} stopped"), record).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// DELETE /api/v1/deployments/:ex/:asset/:image
pub async fn remove_deployment(
    State(state): State<ApiState>,
    Path(parts): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = record_key(parts);
    match state.orchestrator.remove_completely(&key).await {
        Ok(()) => ApiResponse::ok(format!("{key} removed"), key).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/deployments/:ex/:asset/:image/logs
pub async fn logs(
    State(state): State<ApiState>,
    Path(parts): Path<(String, String, String)>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let key = record_key(parts);
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL).clamp(1, MAX_LOG_TAIL);
    match state.orchestrator.logs(&key, tail).await {
        Ok(lines) => ApiResponse::ok(format!("{} log lines", lines.len()), lines).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
