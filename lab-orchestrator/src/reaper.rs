//! Idle workspace reclamation.
//!
//! The reaper goes through the public orchestrator operations like any other
//! caller, so it is safe to run next to user requests and next to another sweep.

use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::orchestrator::LifecycleOrchestrator;
use crate::workspace::{Workspace, WorkspaceStatus};

/// Thresholds for a scheduled sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperPolicy {
    /// Pause RUNNING workspaces idle for longer than this.
    pub pause_after: Option<Duration>,
    /// Delete RUNNING or PAUSED workspaces idle for longer than this.
    pub delete_after: Duration,
}

impl Default for ReaperPolicy {
    fn default() -> Self {
        Self {
            pause_after: None,
            delete_after: Duration::from_secs(4 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub examined: usize,
    pub reclaimed: usize,
    pub paused: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct IdleReaper {
    orchestrator: LifecycleOrchestrator,
}

impl IdleReaper {
    pub fn new(orchestrator: LifecycleOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Delete every RUNNING workspace idle for longer than `max_idle`.
    pub async fn sweep(&self, max_idle: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let candidates = self.orchestrator.list_by_status(WorkspaceStatus::Running);
        report.examined = candidates.len();

        for workspace in candidates.iter().filter(|w| self.is_idle(w, max_idle)) {
            self.reclaim(workspace, max_idle, &mut report).await;
        }

        self.log(&report, "Idle sweep finished");
        report
    }

    /// Scheduled variant: pause what has idled briefly, delete what has idled long.
    pub async fn run_policy(&self, policy: &ReaperPolicy) -> SweepReport {
        let mut report = SweepReport::default();
        let mut candidates = self.orchestrator.list_by_status(WorkspaceStatus::Running);
        candidates.extend(self.orchestrator.list_by_status(WorkspaceStatus::Paused));
        report.examined = candidates.len();

        for workspace in &candidates {
            if self.is_idle(workspace, policy.delete_after) {
                self.reclaim(workspace, policy.delete_after, &mut report).await;
                continue;
            }

            let pause_due = policy
                .pause_after
                .is_some_and(|after| self.is_idle(workspace, after));
            if workspace.status == WorkspaceStatus::Running && pause_due {
                match self.orchestrator.pause(&workspace.id).await {
                    Ok(_) => {
                        debug!(workspace_id = %workspace.id, "Paused idle workspace");
                        report.paused += 1;
                    }
                    Err(err) => {
                        warn!(workspace_id = %workspace.id, error = %err, "Failed to pause idle workspace");
                        report.failed += 1;
                    }
                }
            }
        }

        self.log(&report, "Idle policy sweep finished");
        report
    }

    fn is_idle(&self, workspace: &Workspace, max_idle: Duration) -> bool {
        // Thresholds too large for chrono are never reached
        let Ok(max_idle) = TimeDelta::from_std(max_idle) else {
            return false;
        };
        self.orchestrator.now() - workspace.last_accessed_at > max_idle
    }

    async fn reclaim(&self, workspace: &Workspace, max_idle: Duration, report: &mut SweepReport) {
        // Activity may have arrived since the candidate list was taken
        let still_idle = self
            .orchestrator
            .find(&workspace.id)
            .is_some_and(|current| current.is_active() && self.is_idle(&current, max_idle));
        if !still_idle {
            return;
        }

        match self.orchestrator.delete(&workspace.id).await {
            Ok(_) => {
                info!(
                    workspace_id = %workspace.id,
                    owner_id = %workspace.owner_id,
                    course_id = %workspace.course_id,
                    "Reclaimed idle workspace"
                );
                report.reclaimed += 1;
            }
            Err(err) => {
                warn!(workspace_id = %workspace.id, error = %err, "Failed to reclaim idle workspace");
                report.failed += 1;
            }
        }
    }

    fn log(&self, report: &SweepReport, message: &str) {
        if report.reclaimed + report.paused + report.failed > 0 {
            info!(
                examined = report.examined,
                reclaimed = report.reclaimed,
                paused = report.paused,
                failed = report.failed,
                "{message}"
            );
        } else {
            debug!(examined = report.examined, "{message}");
        }
    }
}
