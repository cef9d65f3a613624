use std::fmt;

use lab_driver::DriverError;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::workspace::{WorkspaceKey, WorkspaceStatus};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Coarse error classification consumed by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    ResourceLimit,
    InvalidTransition,
    CreationFailed,
    LifecycleFailed,
    EndpointResolutionFailed,
    ImageFailed,
    NetworkFailed,
    BackendUnavailable,
    ShuttingDown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ResourceLimit => "resource_limit",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::CreationFailed => "creation_failed",
            ErrorKind::LifecycleFailed => "lifecycle_failed",
            ErrorKind::EndpointResolutionFailed => "endpoint_resolution_failed",
            ErrorKind::ImageFailed => "image_failed",
            ErrorKind::NetworkFailed => "network_failed",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of a lifecycle operation during which the driver failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ImagePull,
    ContainerCreate,
    ContainerStart,
    EndpointResolution,
    Pause,
    Resume,
    Stop,
    Remove,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ImagePull => "image pull",
            Stage::ContainerCreate => "container create",
            Stage::ContainerStart => "container start",
            Stage::EndpointResolution => "endpoint resolution",
            Stage::Pause => "pause",
            Stage::Resume => "resume",
            Stage::Stop => "stop",
            Stage::Remove => "remove",
        })
    }
}

/// Public orchestrator operations, as named in transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Pause,
    Resume,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::Delete => "delete",
        })
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Requested resources {requested} exceed the ceiling of {ceiling}")]
    ResourceLimit {
        requested: lab_driver::ResourceProfile,
        ceiling: lab_driver::ResourceProfile,
    },

    #[error("Cannot {operation} workspace {workspace_id} while it is {current}")]
    InvalidTransition {
        workspace_id: String,
        operation: Operation,
        current: WorkspaceStatus,
    },

    #[error("Creating workspace for {key} failed during {stage}: {source}")]
    CreationFailed {
        key: WorkspaceKey,
        workspace_id: String,
        stage: Stage,
        #[source]
        source: DriverError,
    },

    #[error("Workspace {workspace_id} failed during {stage}: {source}")]
    LifecycleFailed {
        workspace_id: String,
        stage: Stage,
        #[source]
        source: DriverError,
    },

    #[error("Workspace {workspace_id} image pull failed: {source}")]
    ImageFailed {
        workspace_id: String,
        #[source]
        source: DriverError,
    },

    #[error("Workspace {workspace_id} network setup failed during {stage}: {source}")]
    NetworkFailed {
        workspace_id: String,
        stage: Stage,
        #[source]
        source: DriverError,
    },

    #[error("Workspace {workspace_id} endpoint resolution failed: {source}")]
    EndpointResolutionFailed {
        workspace_id: String,
        #[source]
        source: DriverError,
    },

    #[error("Container backend unavailable for workspace {workspace_id} during {stage}: {source}")]
    BackendUnavailable {
        workspace_id: String,
        stage: Stage,
        #[source]
        source: DriverError,
    },

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::ResourceLimit { .. } => ErrorKind::ResourceLimit,
            OrchestratorError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            OrchestratorError::CreationFailed { .. } => ErrorKind::CreationFailed,
            OrchestratorError::LifecycleFailed { .. } => ErrorKind::LifecycleFailed,
            OrchestratorError::ImageFailed { .. } => ErrorKind::ImageFailed,
            OrchestratorError::NetworkFailed { .. } => ErrorKind::NetworkFailed,
            OrchestratorError::EndpointResolutionFailed { .. } => {
                ErrorKind::EndpointResolutionFailed
            }
            OrchestratorError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            OrchestratorError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Status of the workspace when a transition was refused.
    pub fn current_status(&self) -> Option<WorkspaceStatus> {
        match self {
            OrchestratorError::InvalidTransition { current, .. } => Some(*current),
            _ => None,
        }
    }

    /// Driver stage that failed, for driver-reported errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OrchestratorError::CreationFailed { stage, .. }
            | OrchestratorError::LifecycleFailed { stage, .. }
            | OrchestratorError::NetworkFailed { stage, .. }
            | OrchestratorError::BackendUnavailable { stage, .. } => Some(*stage),
            OrchestratorError::ImageFailed { .. } => Some(Stage::ImagePull),
            OrchestratorError::EndpointResolutionFailed { .. } => Some(Stage::EndpointResolution),
            _ => None,
        }
    }

    /// Classify a driver failure raised while `operation` was at `stage`.
    pub(crate) fn from_driver(
        operation: Operation,
        key: &WorkspaceKey,
        workspace_id: &str,
        stage: Stage,
        source: DriverError,
    ) -> Self {
        let workspace_id = workspace_id.to_string();
        match source {
            DriverError::BackendUnavailable { .. } => OrchestratorError::BackendUnavailable {
                workspace_id,
                stage,
                source,
            },
            DriverError::Image { .. } => OrchestratorError::ImageFailed {
                workspace_id,
                source,
            },
            DriverError::Network(_) => OrchestratorError::NetworkFailed {
                workspace_id,
                stage,
                source,
            },
            DriverError::Endpoint(_) => OrchestratorError::EndpointResolutionFailed {
                workspace_id,
                source,
            },
            _ if operation == Operation::Create => OrchestratorError::CreationFailed {
                key: key.clone(),
                workspace_id,
                stage,
                source,
            },
            _ => OrchestratorError::LifecycleFailed {
                workspace_id,
                stage,
                source,
            },
        }
    }
}
