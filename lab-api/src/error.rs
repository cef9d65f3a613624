use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lab_orchestrator::{ErrorKind, OrchestratorError, WorkspaceStatus};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<WorkspaceStatus>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub current_status: Option<WorkspaceStatus>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::Validation.as_str(),
            message: message.into(),
            current_status: None,
        }
    }
}

/// HTTP status for each orchestrator error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::ResourceLimit => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::CreationFailed
        | ErrorKind::LifecycleFailed
        | ErrorKind::EndpointResolutionFailed
        | ErrorKind::ImageFailed
        | ErrorKind::NetworkFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::BackendUnavailable | ErrorKind::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let kind = err.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            warn!(%kind, error = %err, "Request failed");
        }
        Self {
            status,
            kind: kind.as_str(),
            message: err.to_string(),
            current_status: err.current_status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            kind: self.kind.to_string(),
            current_status: self.current_status,
        };
        (self.status, Json(body)).into_response()
    }
}
