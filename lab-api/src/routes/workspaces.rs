use crate::{
    error::{ApiResult, ErrorBody},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use lab_orchestrator::{Workspace, WorkspaceStatus};
use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WorkspaceFilters {
    pub owner_id: Option<String>,
    pub course_id: Option<String>,
    pub status: Option<WorkspaceStatus>,
}

impl WorkspaceFilters {
    fn matches(&self, workspace: &Workspace) -> bool {
        self.owner_id.as_ref().is_none_or(|o| *o == workspace.owner_id)
            && self.course_id.as_ref().is_none_or(|c| *c == workspace.course_id)
            && self.status.is_none_or(|s| s == workspace.status)
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/workspaces", get(list_workspaces))
        .route(
            "/api/v1/workspaces/{id}",
            get(get_workspace).delete(delete_workspace),
        )
        .route("/api/v1/workspaces/{id}/pause", post(pause_workspace))
        .route("/api/v1/workspaces/{id}/resume", post(resume_workspace))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces",
    params(WorkspaceFilters),
    responses((status = 200, description = "Workspaces, newest first", body = [Workspace])),
    tag = "workspaces"
)]
pub async fn list_workspaces(
    State(state): State<AppState>,
    Query(filters): Query<WorkspaceFilters>,
) -> Json<Vec<Workspace>> {
    let workspaces = state
        .orchestrator
        .list()
        .into_iter()
        .filter(|w| filters.matches(w))
        .collect();

    Json(workspaces)
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Current workspace state", body = Workspace),
        (status = 404, description = "Unknown workspace", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state.orchestrator.status(&id)?;

    Ok(Json(workspace))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/pause",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace paused", body = Workspace),
        (status = 404, description = "Unknown workspace", body = ErrorBody),
        (status = 409, description = "Workspace is not running", body = ErrorBody),
        (status = 502, description = "Container backend failed", body = ErrorBody),
        (status = 503, description = "Container backend unavailable", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn pause_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state.orchestrator.pause(&id).await?;
    Ok(Json(workspace))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/resume",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace running again", body = Workspace),
        (status = 404, description = "Unknown workspace", body = ErrorBody),
        (status = 409, description = "Workspace is not paused", body = ErrorBody),
        (status = 502, description = "Container backend failed", body = ErrorBody),
        (status = 503, description = "Container backend unavailable", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn resume_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state.orchestrator.resume(&id).await?;
    Ok(Json(workspace))
}

#[utoipa::path(
    delete,
    path = "/api/v1/workspaces/{id}",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace tombstone", body = Workspace),
        (status = 404, description = "Unknown workspace", body = ErrorBody),
        (status = 502, description = "Container backend failed", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn delete_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state.orchestrator.delete(&id).await?;
    Ok(Json(workspace))
}
