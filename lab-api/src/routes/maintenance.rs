use crate::{
    error::{ApiError, ApiResult, ErrorBody},
    state::AppState,
};
use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use utoipa::ToSchema;

use crate::auth::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CleanupIdleRequest {
    /// Workspaces idle for longer than this are deleted.
    pub max_idle_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CleanupIdleResponse {
    pub reclaimed_count: usize,
    pub examined: usize,
    pub failed: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/maintenance/cleanup-idle", post(cleanup_idle))
}

#[utoipa::path(
    post,
    path = "/api/v1/maintenance/cleanup-idle",
    request_body = CleanupIdleRequest,
    responses(
        (status = 200, description = "Sweep finished", body = CleanupIdleResponse),
        (status = 400, description = "Invalid idle threshold", body = ErrorBody)
    ),
    tag = "maintenance"
)]
pub async fn cleanup_idle(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CleanupIdleRequest>,
) -> ApiResult<Json<CleanupIdleResponse>> {
    let max_idle = Duration::try_from_secs_f64(req.max_idle_hours * 3600.0).map_err(|_| {
        ApiError::bad_request(format!(
            "max_idle_hours must be a non-negative number, got {}",
            req.max_idle_hours
        ))
    })?;

    info!(requested_by = %user.username, ?max_idle, "On-demand idle sweep");
    let report = state.reaper.sweep(max_idle).await;

    Ok(Json(CleanupIdleResponse {
        reclaimed_count: report.reclaimed,
        examined: report.examined,
        failed: report.failed,
    }))
}
