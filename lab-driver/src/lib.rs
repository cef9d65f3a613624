//! Container driver abstraction.
//!
//! This crate is the only layer that talks to the container runtime. It defines the
//! [`ContainerDriver`] contract used by the orchestrator, the error taxonomy shared by
//! every driver, a retrying decorator for transient backend failures, and the Docker
//! CLI implementation.

// Standard library
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// External crates
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod error;
pub mod retry;

#[cfg(feature = "docker")]
pub mod docker;

// When the `test-helpers` feature is enabled, include the in-memory driver.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use error::{DriverError, DriverOp, Result};
pub use retry::{RetryPolicy, Retrying};

#[cfg(feature = "docker")]
pub use docker::{DockerDriver, DockerDriverConfig};

/// Prefix for every container name created by a driver.
pub const CONTAINER_PREFIX: &str = "lab-";
/// Label marking a container as owned by the orchestrator.
pub const MANAGED_LABEL: &str = "io.labspace.managed";
/// Label carrying the workspace id a container was created for.
pub const WORKSPACE_LABEL: &str = "io.labspace.workspace";
/// Prefix of the labels mapping IDE names to container ports.
pub const IDE_LABEL_PREFIX: &str = "io.labspace.ide.";

/// IDE name to externally reachable URL.
pub type Endpoints = BTreeMap<String, String>;

/// CPU and memory limits requested for a workspace container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ResourceProfile {
    /// CPU limit in thousandths of a core.
    pub cpu_millicores: u32,
    /// Memory limit in MiB.
    pub memory_mb: u64,
}

impl ResourceProfile {
    pub const fn new(cpu_millicores: u32, memory_mb: u64) -> Self {
        Self {
            cpu_millicores,
            memory_mb,
        }
    }

    /// True when neither limit exceeds the matching limit of `ceiling`.
    pub fn fits_within(&self, ceiling: &ResourceProfile) -> bool {
        self.cpu_millicores <= ceiling.cpu_millicores && self.memory_mb <= ceiling.memory_mb
    }

    pub fn is_empty(&self) -> bool {
        self.cpu_millicores == 0 || self.memory_mb == 0
    }

    /// Value for `docker create --cpus`.
    pub fn docker_cpus(&self) -> String {
        format!(
            "{}.{:03}",
            self.cpu_millicores / 1000,
            self.cpu_millicores % 1000
        )
    }

    /// Value for `docker create --memory`.
    pub fn docker_memory(&self) -> String {
        format!("{}m", self.memory_mb)
    }
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self::new(1000, 2048)
    }
}

impl fmt::Display for ResourceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}m CPU / {} MiB",
            self.cpu_millicores, self.memory_mb
        )
    }
}

/// Everything a driver needs to provision one workspace container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Idempotency key: repeated creates for the same workspace yield the same container.
    pub workspace_id: String,
    pub image: String,
    pub resources: ResourceProfile,
    /// IDE name to the port it listens on inside the container.
    pub ide_ports: BTreeMap<String, u16>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Deterministic container name derived from the workspace id.
    pub fn container_name(&self) -> String {
        format!("{CONTAINER_PREFIX}{}", self.workspace_id)
    }
}

/// The contract every container backend implements.
///
/// Implementations must be safe to call concurrently. `create` must be idempotent for
/// a given [`ContainerSpec::workspace_id`], since callers retry after an uncertain
/// outcome.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Get the name of the driver (e.g., "docker", "fake").
    fn name(&self) -> &'static str;

    /// Provision a container and return its reference. Does not start it.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, container: &str) -> Result<()>;

    async fn pause(&self, container: &str) -> Result<()>;

    async fn unpause(&self, container: &str) -> Result<()>;

    async fn stop(&self, container: &str) -> Result<()>;

    /// Remove a container. Removing a container that no longer exists succeeds.
    async fn remove(&self, container: &str) -> Result<()>;

    /// Resolve the running container's published ports to IDE URLs.
    async fn endpoints(&self, container: &str) -> Result<Endpoints>;

    /// References of every container carrying [`MANAGED_LABEL`].
    async fn list_managed(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<D> ContainerDriver for Arc<D>
where
    D: ContainerDriver + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        (**self).create(spec).await
    }

    async fn start(&self, container: &str) -> Result<()> {
        (**self).start(container).await
    }

    async fn pause(&self, container: &str) -> Result<()> {
        (**self).pause(container).await
    }

    async fn unpause(&self, container: &str) -> Result<()> {
        (**self).unpause(container).await
    }

    async fn stop(&self, container: &str) -> Result<()> {
        (**self).stop(container).await
    }

    async fn remove(&self, container: &str) -> Result<()> {
        (**self).remove(container).await
    }

    async fn endpoints(&self, container: &str) -> Result<Endpoints> {
        (**self).endpoints(container).await
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        (**self).list_managed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_flags_render_limits() {
        let profile = ResourceProfile::new(1500, 4096);
        assert_eq!(profile.docker_cpus(), "1.500");
        assert_eq!(profile.docker_memory(), "4096m");
        assert_eq!(ResourceProfile::new(250, 512).docker_cpus(), "0.250");
    }

    #[test]
    fn fits_within_checks_both_limits() {
        let ceiling = ResourceProfile::new(2000, 4096);
        assert!(ResourceProfile::new(2000, 4096).fits_within(&ceiling));
        assert!(!ResourceProfile::new(2001, 1024).fits_within(&ceiling));
        assert!(!ResourceProfile::new(500, 8192).fits_within(&ceiling));
    }

    #[test]
    fn container_name_is_derived_from_workspace() {
        let spec = ContainerSpec {
            workspace_id: "abc".to_string(),
            image: "img".to_string(),
            resources: ResourceProfile::default(),
            ide_ports: BTreeMap::new(),
            labels: BTreeMap::new(),
        };
        assert_eq!(spec.container_name(), "lab-abc");
    }
}
