//! Workspace lifecycle state machine.
//!
//! [`LifecycleOrchestrator`] is the only component that mutates the registry or talks
//! to the container driver. Creation is serialised per (owner, course) key and every
//! other mutation per workspace id; reads never wait on driver I/O.
//!
//! Mutating operations run on a spawned task, so a caller that gives up (an HTTP
//! client disconnecting, a request timeout) cannot leave a workspace half way
//! through a transition.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lab_driver::{ContainerDriver, ContainerSpec, DriverError, DriverOp, Endpoints, ResourceProfile};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, CourseImage, OrchestratorConfig};
use crate::error::{Operation, OrchestratorError, Result, Stage};
use crate::locks::KeyedLocks;
use crate::registry::WorkspaceRegistry;
use crate::workspace::{CourseOverview, Workspace, WorkspaceKey, WorkspaceStatus};

/// Container label carrying the workspace owner.
pub const OWNER_LABEL: &str = "io.labspace.owner";
/// Container label carrying the course id.
pub const COURSE_LABEL: &str = "io.labspace.course";

/// Outcome of draining the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub attempted: usize,
    pub deleted: usize,
    pub failed: usize,
}

struct Inner {
    driver: Arc<dyn ContainerDriver>,
    registry: WorkspaceRegistry,
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    key_locks: KeyedLocks<WorkspaceKey>,
    id_locks: KeyedLocks<String>,
    draining: AtomicBool,
}

#[derive(Clone)]
pub struct LifecycleOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("driver", &self.inner.driver.name())
            .field("workspaces", &self.inner.registry.len())
            .field("draining", &self.is_draining())
            .finish()
    }
}

impl LifecycleOrchestrator {
    pub fn new(
        driver: Arc<dyn ContainerDriver>,
        config: OrchestratorConfig,
    ) -> std::result::Result<Self, ConfigError> {
        Self::with_clock(driver, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        driver: Arc<dyn ContainerDriver>,
        config: OrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                driver,
                registry: WorkspaceRegistry::new(),
                config,
                clock,
                key_locks: KeyedLocks::new(),
                id_locks: KeyedLocks::new(),
                draining: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn driver_name(&self) -> &'static str {
        self.inner.driver.name()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    pub fn workspace_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.registry.active_count()
    }

    /// Return the live workspace for (owner, course), creating one if there is none.
    #[instrument(skip(self))]
    pub async fn create_or_get(
        &self,
        owner_id: &str,
        course_id: &str,
        resource_profile: Option<ResourceProfile>,
    ) -> Result<Workspace> {
        if owner_id == self.inner.config.instructor_owner {
            return Err(OrchestratorError::Validation(format!(
                "owner id '{owner_id}' is reserved for instructor workspaces"
            )));
        }
        self.create_checked(owner_id, course_id, resource_profile).await
    }

    /// Create-or-get on behalf of the course instructor.
    #[instrument(skip(self))]
    pub async fn create_for_instructor(
        &self,
        course_id: &str,
        resource_profile: Option<ResourceProfile>,
    ) -> Result<Workspace> {
        let owner = self.inner.config.instructor_owner.clone();
        self.create_checked(&owner, course_id, resource_profile).await
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> Result<Workspace> {
        let this = self.clone();
        let id = id.to_string();
        self.detach(async move { this.pause_locked(&id).await }).await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> Result<Workspace> {
        let this = self.clone();
        let id = id.to_string();
        self.detach(async move { this.resume_locked(&id).await }).await
    }

    /// Delete a workspace. Deleting a tombstone returns it unchanged.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<Workspace> {
        let this = self.clone();
        let id = id.to_string();
        self.detach(async move { this.delete_locked(&id).await }).await
    }

    /// Current state of a workspace; counts as activity for idle reaping.
    pub fn status(&self, id: &str) -> Result<Workspace> {
        self.inner
            .registry
            .touch(id, self.now())
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Look a workspace up without counting it as activity.
    pub fn find(&self, id: &str) -> Option<Workspace> {
        self.inner.registry.get(id)
    }

    /// Every known workspace, tombstones included, newest first.
    pub fn list(&self) -> Vec<Workspace> {
        self.inner.registry.list()
    }

    pub fn list_by_course(&self, course_id: &str) -> Vec<Workspace> {
        self.inner.registry.list_by_course(course_id)
    }

    pub fn list_by_status(&self, status: WorkspaceStatus) -> Vec<Workspace> {
        self.inner.registry.list_by_status(status)
    }

    pub fn course_overview(&self, course_id: &str) -> CourseOverview {
        CourseOverview::from_workspaces(course_id, self.list_by_course(course_id))
    }

    /// Stop accepting creations and delete every live workspace.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.inner.draining.store(true, Ordering::SeqCst);

        let mut report = ShutdownReport::default();
        let mut attempted = HashSet::new();

        // A creation that passed its draining check just before the flag flipped can
        // still register a workspace, so rescan until nothing new shows up.
        loop {
            let targets: Vec<String> = self
                .inner
                .registry
                .list()
                .into_iter()
                .filter(|w| w.is_active() && !attempted.contains(&w.id))
                .map(|w| w.id)
                .collect();
            if targets.is_empty() {
                break;
            }

            info!(count = targets.len(), "Deleting live workspaces before shutdown");
            let mut tasks = JoinSet::new();
            for id in targets {
                attempted.insert(id.clone());
                let this = self.clone();
                tasks.spawn(async move {
                    let result = this.delete(&id).await;
                    (id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                report.attempted += 1;
                match joined {
                    Ok((_, Ok(_))) => report.deleted += 1,
                    Ok((id, Err(err))) => {
                        warn!(workspace_id = %id, error = %err, "Failed to delete workspace during shutdown");
                        report.failed += 1;
                    }
                    Err(err) => {
                        error!(error = %err, "Shutdown delete task failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            attempted = report.attempted,
            deleted = report.deleted,
            failed = report.failed,
            "Orchestrator drained"
        );
        report
    }

    /// Remove managed containers that no workspace in the registry owns.
    ///
    /// The registry lives in memory, so at startup this removes everything a previous
    /// process left behind.
    pub async fn reclaim_orphans(&self) -> std::result::Result<usize, DriverError> {
        let managed = self
            .call(DriverOp::List, self.inner.driver.list_managed())
            .await?;
        let owned: HashSet<String> = self.inner.registry.container_refs().into_iter().collect();

        let mut removed = 0;
        for container in managed.iter().filter(|c| !owned.contains(*c)) {
            match self
                .call(DriverOp::Remove, self.inner.driver.remove(container))
                .await
            {
                Ok(()) => {
                    info!(container = %container, "Removed orphaned container");
                    removed += 1;
                }
                Err(err) => {
                    warn!(container = %container, error = %err, "Failed to remove orphaned container")
                }
            }
        }
        Ok(removed)
    }

    async fn create_checked(
        &self,
        owner_id: &str,
        course_id: &str,
        resource_profile: Option<ResourceProfile>,
    ) -> Result<Workspace> {
        let (key, course, profile) = self.validate_request(owner_id, course_id, resource_profile)?;
        let this = self.clone();
        self.detach(async move { this.create_locked(key, course, profile).await })
            .await
    }

    fn validate_request(
        &self,
        owner_id: &str,
        course_id: &str,
        resource_profile: Option<ResourceProfile>,
    ) -> Result<(WorkspaceKey, CourseImage, ResourceProfile)> {
        if owner_id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "owner id must not be empty".to_string(),
            ));
        }
        if course_id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "course id must not be empty".to_string(),
            ));
        }
        let course = self
            .inner
            .config
            .courses
            .get(course_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Validation(format!("unknown course '{course_id}'")))?;

        let profile = resource_profile.unwrap_or(course.default_profile);
        if profile.is_empty() {
            return Err(OrchestratorError::Validation(
                "resource profile must request CPU and memory".to_string(),
            ));
        }
        let ceiling = self.inner.config.resource_ceiling;
        if !profile.fits_within(&ceiling) {
            return Err(OrchestratorError::ResourceLimit {
                requested: profile,
                ceiling,
            });
        }
        if self.is_draining() {
            return Err(OrchestratorError::ShuttingDown);
        }

        Ok((WorkspaceKey::new(owner_id, course_id), course, profile))
    }

    async fn create_locked(
        &self,
        key: WorkspaceKey,
        course: CourseImage,
        profile: ResourceProfile,
    ) -> Result<Workspace> {
        // Held for the whole creation: racing callers wait here and get the winner
        let _key_guard = self.inner.key_locks.lock(key.clone()).await;

        if let Some(existing) = self.inner.registry.get_by_owner_course(&key) {
            debug!(workspace_id = %existing.id, status = %existing.status, "Returning existing workspace");
            return Ok(existing);
        }
        if self.is_draining() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let workspace = match self
            .inner
            .registry
            .reserve(Workspace::new(&key, profile, self.now()))
        {
            Ok(workspace) => workspace,
            Err(existing) => return Ok(existing),
        };
        let _id_guard = self.inner.id_locks.lock(workspace.id.clone()).await;

        info!(
            workspace_id = %workspace.id,
            owner_id = %key.owner_id,
            course_id = %key.course_id,
            image = %course.image,
            resources = %profile,
            "Creating workspace"
        );

        let spec = ContainerSpec {
            workspace_id: workspace.id.clone(),
            image: course.image.clone(),
            resources: profile,
            ide_ports: course.ides.clone(),
            labels: BTreeMap::from([
                (OWNER_LABEL.to_string(), key.owner_id.clone()),
                (COURSE_LABEL.to_string(), key.course_id.clone()),
            ]),
        };

        let container = match self
            .call(DriverOp::Create, self.inner.driver.create(&spec))
            .await
        {
            Ok(container) => container,
            Err(err) => {
                // A timed out or exhausted create may still have provisioned the container
                let name = spec.container_name();
                return Err(self
                    .fail(
                        Operation::Create,
                        &workspace,
                        Some(&name),
                        Stage::ContainerCreate,
                        err,
                    )
                    .await);
            }
        };

        if let Err(err) = self
            .call(DriverOp::Start, self.inner.driver.start(&container))
            .await
        {
            return Err(self
                .fail(
                    Operation::Create,
                    &workspace,
                    Some(&container),
                    Stage::ContainerStart,
                    err,
                )
                .await);
        }

        let endpoints = match self.resolve_endpoints(&container).await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                return Err(self
                    .fail(
                        Operation::Create,
                        &workspace,
                        Some(&container),
                        Stage::EndpointResolution,
                        err,
                    )
                    .await)
            }
        };

        let now = self.now();
        let running = self
            .inner
            .registry
            .update(&workspace.id, |w| w.mark_running(container, endpoints, now))
            .ok_or_else(|| OrchestratorError::NotFound(workspace.id.clone()))?;

        info!(workspace_id = %running.id, ides = running.ide_endpoints.len(), "Workspace running");
        Ok(running)
    }

    async fn pause_locked(&self, id: &str) -> Result<Workspace> {
        let _id_guard = self.inner.id_locks.lock(id.to_string()).await;
        let workspace = self.get(id)?;
        let container = self.require(&workspace, Operation::Pause, WorkspaceStatus::Running)?;

        match self
            .call(DriverOp::Pause, self.inner.driver.pause(&container))
            .await
        {
            Ok(()) => {}
            // Backend never acted on the request, so nothing changed
            Err(err) if err.is_backend_unavailable() => {
                warn!(workspace_id = %id, error = %err, "Pause failed, workspace left running");
                return Err(OrchestratorError::from_driver(
                    Operation::Pause,
                    &workspace.key(),
                    id,
                    Stage::Pause,
                    err,
                ));
            }
            Err(err) => {
                return Err(self
                    .fail(Operation::Pause, &workspace, Some(&container), Stage::Pause, err)
                    .await)
            }
        }

        let now = self.now();
        let paused = self
            .inner
            .registry
            .update(id, |w| w.mark_paused(now))
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        info!(workspace_id = %id, "Workspace paused");
        Ok(paused)
    }

    async fn resume_locked(&self, id: &str) -> Result<Workspace> {
        let _id_guard = self.inner.id_locks.lock(id.to_string()).await;
        let workspace = self.get(id)?;
        let container = self.require(&workspace, Operation::Resume, WorkspaceStatus::Paused)?;

        match self
            .call(DriverOp::Unpause, self.inner.driver.unpause(&container))
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_backend_unavailable() => {
                warn!(workspace_id = %id, error = %err, "Resume failed, workspace left paused");
                return Err(OrchestratorError::from_driver(
                    Operation::Resume,
                    &workspace.key(),
                    id,
                    Stage::Resume,
                    err,
                ));
            }
            Err(err) => {
                return Err(self
                    .fail(Operation::Resume, &workspace, Some(&container), Stage::Resume, err)
                    .await)
            }
        }

        // The container is already unpaused here, so any failure is mid-transition
        let endpoints = match self.resolve_endpoints(&container).await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                return Err(self
                    .fail(
                        Operation::Resume,
                        &workspace,
                        Some(&container),
                        Stage::EndpointResolution,
                        err,
                    )
                    .await)
            }
        };

        let now = self.now();
        let running = self
            .inner
            .registry
            .update(id, |w| w.mark_running(container, endpoints, now))
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        info!(workspace_id = %id, "Workspace resumed");
        Ok(running)
    }

    async fn delete_locked(&self, id: &str) -> Result<Workspace> {
        let key = self.get(id)?.key();
        let _key_guard = self.inner.key_locks.lock(key).await;
        let _id_guard = self.inner.id_locks.lock(id.to_string()).await;

        let workspace = self.get(id)?;
        if workspace.status.is_terminal() {
            debug!(workspace_id = %id, status = %workspace.status, "Workspace already reclaimed");
            return Ok(workspace);
        }

        let was_running = workspace.status == WorkspaceStatus::Running;
        let container = workspace.container_ref.clone();
        let now = self.now();
        self.inner.registry.update(id, |w| w.mark_deleting(now));
        info!(workspace_id = %id, from = %workspace.status, "Deleting workspace");

        if let Some(container) = container {
            if was_running {
                match self
                    .call(DriverOp::Stop, self.inner.driver.stop(&container))
                    .await
                {
                    Ok(()) => {}
                    Err(err @ (DriverError::BackendUnavailable { .. } | DriverError::Timeout { .. })) => {
                        return Err(self
                            .fail(Operation::Delete, &workspace, Some(&container), Stage::Stop, err)
                            .await)
                    }
                    // rm --force kills it anyway
                    Err(err) => {
                        warn!(workspace_id = %id, error = %err, "Stop failed, removing container anyway")
                    }
                }
            }

            if let Err(err) = self
                .call(DriverOp::Remove, self.inner.driver.remove(&container))
                .await
            {
                return Err(self
                    .fail(Operation::Delete, &workspace, Some(&container), Stage::Remove, err)
                    .await);
            }
        }

        let now = self.now();
        let deleted = self
            .inner
            .registry
            .update(id, |w| w.mark_deleted(now))
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        info!(workspace_id = %id, "Workspace deleted");
        Ok(deleted)
    }

    fn get(&self, id: &str) -> Result<Workspace> {
        self.inner
            .registry
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Check `workspace` is in `expected` and return its container.
    fn require(
        &self,
        workspace: &Workspace,
        operation: Operation,
        expected: WorkspaceStatus,
    ) -> Result<String> {
        match (&workspace.container_ref, workspace.status == expected) {
            (Some(container), true) => Ok(container.clone()),
            _ => Err(OrchestratorError::InvalidTransition {
                workspace_id: workspace.id.clone(),
                operation,
                current: workspace.status,
            }),
        }
    }

    async fn resolve_endpoints(&self, container: &str) -> lab_driver::Result<Endpoints> {
        let endpoints = self
            .call(DriverOp::Endpoints, self.inner.driver.endpoints(container))
            .await?;
        if endpoints.is_empty() {
            return Err(DriverError::Endpoint(format!(
                "container {container} reported no IDE endpoints"
            )));
        }
        Ok(endpoints)
    }

    /// Move a workspace to FAILED, discard its container if one is known, and build
    /// the error to surface.
    async fn fail(
        &self,
        operation: Operation,
        workspace: &Workspace,
        container: Option<&str>,
        stage: Stage,
        source: DriverError,
    ) -> OrchestratorError {
        let err = OrchestratorError::from_driver(operation, &workspace.key(), &workspace.id, stage, source);
        error!(
            workspace_id = %workspace.id,
            %operation,
            %stage,
            kind = %err.kind(),
            error = %err,
            "Workspace failed"
        );

        let message = err.to_string();
        let now = self.now();
        self.inner
            .registry
            .update(&workspace.id, |w| w.mark_failed(message, now));

        if let Some(container) = container {
            if let Err(cleanup) = self
                .call(DriverOp::Remove, self.inner.driver.remove(container))
                .await
            {
                warn!(
                    workspace_id = %workspace.id,
                    container,
                    error = %cleanup,
                    "Could not remove container of failed workspace"
                );
            }
        }

        err
    }

    /// Bound a driver call by the configured timeout.
    async fn call<T, F>(&self, operation: DriverOp, call: F) -> lab_driver::Result<T>
    where
        F: Future<Output = lab_driver::Result<T>>,
    {
        let after = self.inner.config.driver_timeout();
        match tokio::time::timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout { operation, after }),
        }
    }

    async fn detach<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::spawn(operation).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(OrchestratorError::ShuttingDown),
        }
    }
}
