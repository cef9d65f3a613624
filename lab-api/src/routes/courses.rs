use crate::{
    auth::AuthenticatedUser,
    error::{ApiResult, ErrorBody},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use lab_orchestrator::{CourseOverview, ResourceProfile, Workspace};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

/// Optional body of the workspace creation routes.
#[derive(Debug, Default, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkspaceRequest {
    /// Defaults to the course's profile.
    #[serde(default)]
    pub resource_profile: Option<ResourceProfile>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/courses/{course_id}/workspace",
            post(create_student_workspace),
        )
        .route(
            "/api/v1/courses/{course_id}/instructor-workspace",
            post(create_instructor_workspace),
        )
        .route("/api/v1/courses/{course_id}/overview", get(course_overview))
}

#[utoipa::path(
    post,
    path = "/api/v1/courses/{course_id}/workspace",
    params(("course_id" = String, Path, description = "Course id")),
    request_body(content = CreateWorkspaceRequest, description = "Optional", content_type = "application/json"),
    responses(
        (status = 200, description = "The caller's live workspace for the course", body = Workspace),
        (status = 400, description = "Unknown course or invalid profile", body = ErrorBody),
        (status = 422, description = "Profile exceeds the resource ceiling", body = ErrorBody),
        (status = 502, description = "Container backend failed", body = ErrorBody),
        (status = 503, description = "Backend unavailable or shutting down", body = ErrorBody)
    ),
    tag = "courses"
)]
pub async fn create_student_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(course_id): Path<String>,
    body: Option<Json<CreateWorkspaceRequest>>,
) -> ApiResult<Json<Workspace>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let workspace = state
        .orchestrator
        .create_or_get(&user.username, &course_id, req.resource_profile)
        .await?;

    Ok(Json(workspace))
}

#[utoipa::path(
    post,
    path = "/api/v1/courses/{course_id}/instructor-workspace",
    params(("course_id" = String, Path, description = "Course id")),
    request_body(content = CreateWorkspaceRequest, description = "Optional", content_type = "application/json"),
    responses(
        (status = 200, description = "The course's instructor workspace", body = Workspace),
        (status = 400, description = "Unknown course or invalid profile", body = ErrorBody),
        (status = 422, description = "Profile exceeds the resource ceiling", body = ErrorBody),
        (status = 502, description = "Container backend failed", body = ErrorBody)
    ),
    tag = "courses"
)]
pub async fn create_instructor_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(course_id): Path<String>,
    body: Option<Json<CreateWorkspaceRequest>>,
) -> ApiResult<Json<Workspace>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    info!(requested_by = %user.username, %course_id, "Instructor workspace requested");

    let workspace = state
        .orchestrator
        .create_for_instructor(&course_id, req.resource_profile)
        .await?;

    Ok(Json(workspace))
}

#[utoipa::path(
    get,
    path = "/api/v1/courses/{course_id}/overview",
    params(("course_id" = String, Path, description = "Course id")),
    responses((status = 200, description = "Workspaces of the course by status", body = CourseOverview)),
    tag = "courses"
)]
pub async fn course_overview(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Json<CourseOverview> {
    Json(state.orchestrator.course_overview(&course_id))
}
