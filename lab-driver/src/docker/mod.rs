//! Docker driver implementation.
//!
//! Drives the local Docker daemon through the `docker` CLI. Containers are named
//! after their workspace (`lab-<workspace id>`), which is what makes `create`
//! idempotent: a second create for the same workspace finds the existing container
//! instead of provisioning another one.

mod command;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    ContainerDriver, ContainerSpec, DriverError, DriverOp, Endpoints, Result, IDE_LABEL_PREFIX,
    MANAGED_LABEL, WORKSPACE_LABEL,
};
use command::DockerCommand;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DockerDriverConfig {
    /// Docker CLI to invoke.
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Host name used when building IDE URLs from published ports.
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Network to attach workspace containers to.
    #[serde(default)]
    pub network: Option<String>,
}

fn default_executable() -> String {
    "docker".to_string()
}

fn default_public_host() -> String {
    "localhost".to_string()
}

impl Default for DockerDriverConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            public_host: default_public_host(),
            network: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DockerDriver {
    config: DockerDriverConfig,
}

impl DockerDriver {
    pub fn new(config: DockerDriverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DockerDriverConfig {
        &self.config
    }

    fn command(&self, operation: DriverOp) -> DockerCommand {
        DockerCommand::new(&self.config.executable, operation)
    }

    /// Make sure `image` is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        let present = self
            .command(DriverOp::Create)
            .subcommand("image")
            .args(["inspect", "--format", "{{.Id}}"])
            .arg(image)
            .execute()
            .await;

        match present {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() => return Err(err),
            Err(_) => {}
        }

        info!(image, "Pulling workspace image");
        self.command(DriverOp::Create)
            .subcommand("pull")
            .arg(image)
            .execute()
            .await
            .map_err(|err| match err {
                DriverError::Transient { .. } => err,
                other => DriverError::Image {
                    image: image.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Full id of the container named `name`, if it exists.
    async fn find_container(&self, name: &str) -> Result<Option<String>> {
        let output = self
            .command(DriverOp::Create)
            .subcommand("ps")
            .args(["-a", "--no-trunc", "--filter"])
            .arg(format!("name=^/{name}$"))
            .args(["--format", "{{.ID}}"])
            .execute_with_output()
            .await?;

        Ok(output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }

    fn create_command(&self, spec: &ContainerSpec) -> DockerCommand {
        let mut cmd = self
            .command(DriverOp::Create)
            .subcommand("create")
            .arg("--name")
            .arg(spec.container_name())
            .arg("--cpus")
            .arg(spec.resources.docker_cpus())
            .arg("--memory")
            .arg(spec.resources.docker_memory())
            .arg("--label")
            .arg(format!("{MANAGED_LABEL}=true"))
            .arg("--label")
            .arg(format!("{WORKSPACE_LABEL}={}", spec.workspace_id));

        for (ide, port) in &spec.ide_ports {
            cmd = cmd
                .arg("--label")
                .arg(format!("{IDE_LABEL_PREFIX}{ide}={port}"))
                .arg("--publish")
                .arg(port.to_string());
        }

        for (key, value) in &spec.labels {
            cmd = cmd.arg("--label").arg(format!("{key}={value}"));
        }

        if let Some(network) = &self.config.network {
            cmd = cmd.arg("--network").arg(network.as_str());
        }

        cmd.arg(spec.image.as_str())
    }

    async fn container_labels(&self, container: &str) -> Result<HashMap<String, String>> {
        let output = self
            .command(DriverOp::Endpoints)
            .subcommand("inspect")
            .args(["--format", "{{json .Config.Labels}}"])
            .arg(container)
            .execute_with_output()
            .await?;

        let labels: Option<HashMap<String, String>> = serde_json::from_str(output.trim())
            .map_err(|e| DriverError::Endpoint(format!("unreadable container labels: {e}")))?;
        Ok(labels.unwrap_or_default())
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let name = spec.container_name();
        self.ensure_image(&spec.image).await?;

        if let Some(existing) = self.find_container(&name).await? {
            debug!(container = %name, id = %existing, "Container already exists, reusing it");
            return Ok(existing);
        }

        match self.create_command(spec).execute_with_output().await {
            Ok(output) => Ok(output.trim().to_string()),
            // Lost a race with an earlier attempt for the same workspace
            Err(DriverError::Lifecycle { reason, .. }) if reason.contains("already in use") => {
                warn!(container = %name, "Container name already in use, reusing it");
                self.find_container(&name)
                    .await?
                    .ok_or(DriverError::Lifecycle {
                        operation: DriverOp::Create,
                        reason,
                    })
            }
            Err(err) => Err(err),
        }
    }

    async fn start(&self, container: &str) -> Result<()> {
        self.command(DriverOp::Start)
            .subcommand("start")
            .arg(container)
            .execute()
            .await
    }

    async fn pause(&self, container: &str) -> Result<()> {
        self.command(DriverOp::Pause)
            .subcommand("pause")
            .arg(container)
            .execute()
            .await
    }

    async fn unpause(&self, container: &str) -> Result<()> {
        self.command(DriverOp::Unpause)
            .subcommand("unpause")
            .arg(container)
            .execute()
            .await
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.command(DriverOp::Stop)
            .subcommand("stop")
            .arg(container)
            .execute()
            .await
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let result = self
            .command(DriverOp::Remove)
            .subcommand("rm")
            .args(["--force", "--volumes"])
            .arg(container)
            .execute()
            .await;

        match result {
            Err(DriverError::ContainerNotFound(_)) => {
                debug!(container, "Container already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn endpoints(&self, container: &str) -> Result<Endpoints> {
        let ides = ide_ports_from_labels(&self.container_labels(container).await?);
        if ides.is_empty() {
            return Err(DriverError::Endpoint(format!(
                "container {container} exposes no IDE ports"
            )));
        }

        let output = self
            .command(DriverOp::Endpoints)
            .subcommand("port")
            .arg(container)
            .execute_with_output()
            .await?;
        let published = parse_port_mappings(&output);

        ides.into_iter()
            .map(|(ide, port)| match published.get(&port) {
                Some(host_port) => Ok((
                    ide,
                    format!("http://{}:{host_port}", self.config.public_host),
                )),
                None => Err(DriverError::Endpoint(format!(
                    "IDE '{ide}' port {port} is not published"
                ))),
            })
            .collect()
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        let output = self
            .command(DriverOp::List)
            .subcommand("ps")
            .args(["-a", "--no-trunc", "--filter"])
            .arg(format!("label={MANAGED_LABEL}"))
            .args(["--format", "{{.ID}}"])
            .execute_with_output()
            .await?;

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// IDE name to container port, read back from the labels set at creation.
fn ide_ports_from_labels(labels: &HashMap<String, String>) -> BTreeMap<String, u16> {
    labels
        .iter()
        .filter_map(|(key, value)| {
            let ide = key.strip_prefix(IDE_LABEL_PREFIX)?;
            let port = value.parse().ok()?;
            Some((ide.to_string(), port))
        })
        .collect()
}

/// Parse `docker port` output into container port -> host port.
///
/// Lines look like `8080/tcp -> 0.0.0.0:49153` or `8080/tcp -> [::]:49153`; the first
/// mapping seen for a container port wins.
fn parse_port_mappings(output: &str) -> BTreeMap<u16, u16> {
    let mut mappings = BTreeMap::new();

    for line in output.lines() {
        let Some((container_side, host_side)) = line.split_once("->") else {
            continue;
        };
        let container_port = container_side
            .trim()
            .split('/')
            .next()
            .and_then(|p| p.parse::<u16>().ok());
        let host_port = host_side
            .trim()
            .rsplit(':')
            .next()
            .and_then(|p| p.parse::<u16>().ok());

        if let (Some(container_port), Some(host_port)) = (container_port, host_port) {
            mappings.entry(container_port).or_insert(host_port);
        }
    }

    mappings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceProfile;

    #[test]
    fn parses_ipv4_and_ipv6_mappings() {
        let output = "8080/tcp -> 0.0.0.0:49153\n8080/tcp -> [::]:49153\n8888/tcp -> 0.0.0.0:49154\n";
        let mappings = parse_port_mappings(output);
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings.get(&8080), Some(&49153));
        assert_eq!(mappings.get(&8888), Some(&49154));
    }

    #[test]
    fn ignores_garbage_lines() {
        let mappings = parse_port_mappings("\nnot a mapping\n80/tcp -> nowhere\n");
        assert!(mappings.is_empty());
    }

    #[test]
    fn reads_ide_ports_from_labels() {
        let labels = HashMap::from([
            (format!("{IDE_LABEL_PREFIX}editor"), "8443".to_string()),
            (format!("{IDE_LABEL_PREFIX}notebook"), "8888".to_string()),
            (format!("{IDE_LABEL_PREFIX}broken"), "not-a-port".to_string()),
            (MANAGED_LABEL.to_string(), "true".to_string()),
        ]);
        let ides = ide_ports_from_labels(&labels);
        assert_eq!(
            ides,
            BTreeMap::from([("editor".to_string(), 8443), ("notebook".to_string(), 8888)])
        );
    }

    #[test]
    fn create_command_carries_limits_labels_and_ports() {
        let driver = DockerDriver::new(DockerDriverConfig {
            network: Some("labs".to_string()),
            ..Default::default()
        });
        let spec = ContainerSpec {
            workspace_id: "ws-1".to_string(),
            image: "registry.local/cs101:latest".to_string(),
            resources: ResourceProfile::new(500, 1024),
            ide_ports: BTreeMap::from([("editor".to_string(), 8443)]),
            labels: BTreeMap::from([("io.labspace.course".to_string(), "cs101".to_string())]),
        };

        let rendered = format!("{:?}", driver.create_command(&spec));
        for expected in [
            "lab-ws-1",
            "0.500",
            "1024m",
            "io.labspace.ide.editor=8443",
            "io.labspace.course=cs101",
            "\"--network\", \"labs\"",
            "registry.local/cs101:latest",
        ] {
            assert!(rendered.contains(expected), "missing {expected} in {rendered}");
        }
    }
}
