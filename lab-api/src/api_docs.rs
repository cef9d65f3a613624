use lab_orchestrator::{CourseOverview, ResourceProfile, Workspace, WorkspaceStatus};
use utoipa::OpenApi;

use crate::error::ErrorBody;
use crate::routes::{
    courses::CreateWorkspaceRequest,
    maintenance::{CleanupIdleRequest, CleanupIdleResponse},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::courses::create_student_workspace,
        crate::routes::courses::create_instructor_workspace,
        crate::routes::courses::course_overview,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::pause_workspace,
        crate::routes::workspaces::resume_workspace,
        crate::routes::workspaces::delete_workspace,
        crate::routes::maintenance::cleanup_idle,
    ),
    components(
        schemas(
            Workspace,
            WorkspaceStatus,
            ResourceProfile,
            CourseOverview,
            CreateWorkspaceRequest,
            CleanupIdleRequest,
            CleanupIdleResponse,
            ErrorBody
        )
    ),
    tags(
        (name = "lab-api", description = "Lab workspace lifecycle API")
    )
)]
pub struct ApiDoc;
