//! In-memory driver for tests.
//!
//! [`FakeDriver`] behaves like a container runtime with instant operations, records
//! every call it receives, and can be told to fail or hang on specific operations.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    ContainerDriver, ContainerSpec, DriverError, DriverOp, Endpoints, Result, CONTAINER_PREFIX,
};

/// What an injected fault does to the next calls of one operation.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail transiently for the given number of calls, then recover.
    Transient(u32),
    /// Fail every call with this error until cleared.
    Fail(DriverError),
    /// Never complete.
    Hang,
    /// Take effect, then never complete, like a backend that acts but never answers.
    HangAfterEffect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeContainer {
    pub workspace_id: String,
    pub image: String,
    pub running: bool,
    pub paused: bool,
    pub ide_ports: BTreeMap<String, u16>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    by_workspace: HashMap<String, String>,
    calls: Vec<(DriverOp, String)>,
    faults: HashMap<DriverOp, Fault>,
    next_container: u64,
    next_host_port: u16,
}

impl FakeState {
    /// Accept either a container reference or the deterministic `lab-<workspace>` name.
    fn resolve(&self, container: &str) -> Option<String> {
        if self.containers.contains_key(container) {
            return Some(container.to_string());
        }
        container
            .strip_prefix(CONTAINER_PREFIX)
            .and_then(|workspace_id| self.by_workspace.get(workspace_id))
            .cloned()
    }
}

enum Action {
    Proceed,
    Fail(DriverError),
    Hang,
}

#[derive(Debug)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
    latency: Option<Duration>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_host_port: 40000,
                ..Default::default()
            }),
            latency: None,
        }
    }

    /// Delay every call by `latency`, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn inject(&self, operation: DriverOp, fault: Fault) {
        self.state.lock().faults.insert(operation, fault);
    }

    pub fn fail_transiently(&self, operation: DriverOp, times: u32) {
        self.inject(operation, Fault::Transient(times));
    }

    pub fn fail_with(&self, operation: DriverOp, error: DriverError) {
        self.inject(operation, Fault::Fail(error));
    }

    pub fn hang(&self, operation: DriverOp) {
        self.inject(operation, Fault::Hang);
    }

    pub fn hang_after_effect(&self, operation: DriverOp) {
        self.inject(operation, Fault::HangAfterEffect);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Number of calls received for `operation`, including failed ones.
    pub fn calls(&self, operation: DriverOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    /// Every call received, in order, with its target.
    pub fn call_log(&self) -> Vec<(DriverOp, String)> {
        self.state.lock().calls.clone()
    }

    pub fn container(&self, container: &str) -> Option<FakeContainer> {
        self.state.lock().containers.get(container).cloned()
    }

    /// References of containers that exist right now.
    pub fn containers(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.state.lock().containers.keys().cloned().collect();
        refs.sort();
        refs
    }

    /// Simulate a container left behind by an earlier process.
    pub fn seed_container(&self, workspace_id: &str) -> String {
        let mut state = self.state.lock();
        state.next_container += 1;
        let container = format!("fake-{:08}", state.next_container);
        state.containers.insert(
            container.clone(),
            FakeContainer {
                workspace_id: workspace_id.to_string(),
                image: "seeded".to_string(),
                running: true,
                paused: false,
                ide_ports: BTreeMap::new(),
            },
        );
        state
            .by_workspace
            .insert(workspace_id.to_string(), container.clone());
        container
    }

    async fn enter(&self, operation: DriverOp, target: &str) -> Result<()> {
        let action = {
            let mut state = self.state.lock();
            state.calls.push((operation, target.to_string()));
            match state.faults.get_mut(&operation) {
                None => Action::Proceed,
                Some(Fault::Transient(0)) | Some(Fault::HangAfterEffect) => Action::Proceed,
                Some(Fault::Transient(remaining)) => {
                    *remaining -= 1;
                    Action::Fail(DriverError::Transient {
                        operation,
                        reason: "connection refused".to_string(),
                    })
                }
                Some(Fault::Fail(error)) => Action::Fail(error.clone()),
                Some(Fault::Hang) => Action::Hang,
            }
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match action {
            Action::Proceed => Ok(()),
            Action::Fail(error) => Err(error),
            Action::Hang => std::future::pending().await,
        }
    }

    fn provision(&self, spec: &ContainerSpec) -> String {
        let mut state = self.state.lock();
        if let Some(existing) = state.by_workspace.get(&spec.workspace_id) {
            return existing.clone();
        }

        state.next_container += 1;
        let container = format!("fake-{:08}", state.next_container);
        state.containers.insert(
            container.clone(),
            FakeContainer {
                workspace_id: spec.workspace_id.clone(),
                image: spec.image.clone(),
                running: false,
                paused: false,
                ide_ports: spec.ide_ports.clone(),
            },
        );
        state
            .by_workspace
            .insert(spec.workspace_id.clone(), container.clone());
        container
    }

    /// Hand `result` back unless the operation is set to hang after taking effect.
    async fn leave<T>(&self, operation: DriverOp, result: Result<T>) -> Result<T> {
        let stalled = matches!(
            self.state.lock().faults.get(&operation),
            Some(Fault::HangAfterEffect)
        );
        if stalled {
            std::future::pending::<()>().await;
        }
        result
    }

    fn with_container<T>(
        &self,
        container: &str,
        f: impl FnOnce(&mut FakeContainer) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let resolved = state.resolve(container).unwrap_or_default();
        match state.containers.get_mut(&resolved) {
            Some(found) => f(found),
            None => Err(DriverError::ContainerNotFound(container.to_string())),
        }
    }
}

fn refused(operation: DriverOp, reason: &str) -> DriverError {
    DriverError::Lifecycle {
        operation,
        reason: reason.to_string(),
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.enter(DriverOp::Create, &spec.workspace_id).await?;
        let container = self.provision(spec);
        self.leave(DriverOp::Create, Ok(container)).await
    }

    async fn start(&self, container: &str) -> Result<()> {
        self.enter(DriverOp::Start, container).await?;
        let result = self.with_container(container, |c| {
            c.running = true;
            Ok(())
        });
        self.leave(DriverOp::Start, result).await
    }

    async fn pause(&self, container: &str) -> Result<()> {
        self.enter(DriverOp::Pause, container).await?;
        let result = self.with_container(container, |c| {
            if !c.running || c.paused {
                return Err(refused(DriverOp::Pause, "container is not running"));
            }
            c.paused = true;
            Ok(())
        });
        self.leave(DriverOp::Pause, result).await
    }

    async fn unpause(&self, container: &str) -> Result<()> {
        self.enter(DriverOp::Unpause, container).await?;
        let result = self.with_container(container, |c| {
            if !c.paused {
                return Err(refused(DriverOp::Unpause, "container is not paused"));
            }
            c.paused = false;
            Ok(())
        });
        self.leave(DriverOp::Unpause, result).await
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.enter(DriverOp::Stop, container).await?;
        let result = self.with_container(container, |c| {
            c.running = false;
            c.paused = false;
            Ok(())
        });
        self.leave(DriverOp::Stop, result).await
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.enter(DriverOp::Remove, container).await?;
        {
            let mut state = self.state.lock();
            if let Some(resolved) = state.resolve(container) {
                if let Some(removed) = state.containers.remove(&resolved) {
                    state.by_workspace.remove(&removed.workspace_id);
                }
            }
        }
        self.leave(DriverOp::Remove, Ok(())).await
    }

    async fn endpoints(&self, container: &str) -> Result<Endpoints> {
        self.enter(DriverOp::Endpoints, container).await?;

        let mut state = self.state.lock();
        let resolved = state.resolve(container).unwrap_or_default();
        let ide_ports = match state.containers.get(&resolved) {
            Some(c) if c.running && !c.paused => c.ide_ports.clone(),
            Some(_) => {
                return Err(DriverError::Endpoint(format!(
                    "container {container} is not running"
                )))
            }
            None => return Err(DriverError::ContainerNotFound(container.to_string())),
        };
        if ide_ports.is_empty() {
            return Err(DriverError::Endpoint(format!(
                "container {container} exposes no IDE ports"
            )));
        }

        // Fresh host ports on every resolution, like a re-published container
        let mut endpoints = Endpoints::new();
        for ide in ide_ports.keys() {
            state.next_host_port = state.next_host_port.wrapping_add(1).max(40000);
            endpoints.insert(
                ide.clone(),
                format!("http://127.0.0.1:{}", state.next_host_port),
            );
        }
        Ok(endpoints)
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        self.enter(DriverOp::List, "*").await?;
        Ok(self.containers())
    }
}
