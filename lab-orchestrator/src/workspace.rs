use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use lab_driver::{Endpoints, ResourceProfile};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    Creating,
    Running,
    Paused,
    Deleting,
    Deleted,
    Failed,
}

impl WorkspaceStatus {
    pub const ALL: [WorkspaceStatus; 6] = [
        WorkspaceStatus::Creating,
        WorkspaceStatus::Running,
        WorkspaceStatus::Paused,
        WorkspaceStatus::Deleting,
        WorkspaceStatus::Deleted,
        WorkspaceStatus::Failed,
    ];

    /// Terminal workspaces are tombstones: they never block a new creation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkspaceStatus::Deleted | WorkspaceStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Creating => "CREATING",
            WorkspaceStatus::Running => "RUNNING",
            WorkspaceStatus::Paused => "PAUSED",
            WorkspaceStatus::Deleting => "DELETING",
            WorkspaceStatus::Deleted => "DELETED",
            WorkspaceStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary registry key: one live workspace per owner and course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceKey {
    pub owner_id: String,
    pub course_id: String,
}

impl WorkspaceKey {
    pub fn new(owner_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            course_id: course_id.into(),
        }
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.course_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Workspace {
    pub id: String,
    pub owner_id: String,
    pub course_id: String,
    pub status: WorkspaceStatus,

    /// Set only while RUNNING or PAUSED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_ref: Option<String>,

    /// Set only while RUNNING.
    pub ide_endpoints: BTreeMap<String, String>,

    pub resource_profile: ResourceProfile,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub last_accessed_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Workspace {
    /// A fresh workspace in CREATING with a new id.
    pub fn new(key: &WorkspaceKey, resource_profile: ResourceProfile, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: key.owner_id.clone(),
            course_id: key.course_id.clone(),
            status: WorkspaceStatus::Creating,
            container_ref: None,
            ide_endpoints: BTreeMap::new(),
            resource_profile,
            created_at: now,
            last_accessed_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    pub fn key(&self) -> WorkspaceKey {
        WorkspaceKey::new(self.owner_id.clone(), self.course_id.clone())
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }

    pub fn mark_running(&mut self, container_ref: String, endpoints: Endpoints, now: DateTime<Utc>) {
        self.status = WorkspaceStatus::Running;
        self.container_ref = Some(container_ref);
        self.ide_endpoints = endpoints;
        self.last_accessed_at = now;
        self.updated_at = now;
    }

    pub fn mark_paused(&mut self, now: DateTime<Utc>) {
        self.status = WorkspaceStatus::Paused;
        self.ide_endpoints.clear();
        self.updated_at = now;
    }

    pub fn mark_deleting(&mut self, now: DateTime<Utc>) {
        self.status = WorkspaceStatus::Deleting;
        self.container_ref = None;
        self.ide_endpoints.clear();
        self.updated_at = now;
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.status = WorkspaceStatus::Deleted;
        self.container_ref = None;
        self.ide_endpoints.clear();
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = WorkspaceStatus::Failed;
        self.container_ref = None;
        self.ide_endpoints.clear();
        self.error_message = Some(message.into());
        self.updated_at = now;
    }
}

/// Instructor view of one course.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CourseOverview {
    pub course_id: String,
    pub total: usize,
    /// Workspaces that are not DELETED or FAILED.
    pub active: usize,
    pub by_status: BTreeMap<String, usize>,
    pub workspaces: Vec<Workspace>,
}

impl CourseOverview {
    pub fn from_workspaces(course_id: &str, workspaces: Vec<Workspace>) -> Self {
        let mut by_status: BTreeMap<String, usize> = WorkspaceStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        for workspace in &workspaces {
            *by_status
                .entry(workspace.status.as_str().to_string())
                .or_default() += 1;
        }

        Self {
            course_id: course_id.to_string(),
            total: workspaces.len(),
            active: workspaces.iter().filter(|w| w.is_active()).count(),
            by_status,
            workspaces,
        }
    }
}

fn serialize_datetime<S>(dt: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        Workspace::new(
            &WorkspaceKey::new("s1", "c1"),
            ResourceProfile::default(),
            Utc::now(),
        )
    }

    #[test]
    fn new_workspace_is_creating_without_container() {
        let ws = workspace();
        assert_eq!(ws.status, WorkspaceStatus::Creating);
        assert!(ws.container_ref.is_none());
        assert!(ws.ide_endpoints.is_empty());
        assert_eq!(ws.key(), WorkspaceKey::new("s1", "c1"));
    }

    #[test]
    fn endpoints_only_survive_while_running() {
        let mut ws = workspace();
        let now = Utc::now();
        ws.mark_running(
            "c-1".to_string(),
            Endpoints::from([("editor".to_string(), "http://h:1".to_string())]),
            now,
        );
        assert_eq!(ws.container_ref.as_deref(), Some("c-1"));
        assert_eq!(ws.ide_endpoints.len(), 1);

        ws.mark_paused(now);
        assert_eq!(ws.container_ref.as_deref(), Some("c-1"));
        assert!(ws.ide_endpoints.is_empty());

        ws.mark_deleting(now);
        assert!(ws.container_ref.is_none());

        ws.mark_deleted(now);
        assert!(ws.status.is_terminal());
    }

    #[test]
    fn failure_records_message_and_clears_container() {
        let mut ws = workspace();
        ws.mark_running("c-1".to_string(), Endpoints::new(), Utc::now());
        ws.mark_failed("container start failed", Utc::now());
        assert_eq!(ws.status, WorkspaceStatus::Failed);
        assert!(ws.container_ref.is_none());
        assert_eq!(ws.error_message.as_deref(), Some("container start failed"));
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&WorkspaceStatus::Paused).unwrap();
        assert_eq!(json, "\"PAUSED\"");
    }

    #[test]
    fn overview_counts_statuses() {
        let mut failed = workspace();
        failed.mark_failed("boom", Utc::now());
        let overview = CourseOverview::from_workspaces("c1", vec![workspace(), failed]);

        assert_eq!(overview.total, 2);
        assert_eq!(overview.active, 1);
        assert_eq!(overview.by_status["CREATING"], 1);
        assert_eq!(overview.by_status["FAILED"], 1);
        assert_eq!(overview.by_status["RUNNING"], 0);
    }
}
