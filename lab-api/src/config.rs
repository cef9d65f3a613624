use std::path::PathBuf;
use std::time::Duration;

use lab_driver::DockerDriverConfig;
use lab_orchestrator::{CourseCatalog, OrchestratorConfig, ReaperPolicy};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// YAML course catalog.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    #[serde(default = "default_pause_after")]
    pub pause_after_secs: Option<u64>,

    #[serde(default = "default_delete_after")]
    pub delete_after_secs: u64,

    #[serde(default = "default_driver_timeout")]
    pub driver_timeout_secs: u64,

    #[serde(default = "default_public_host")]
    pub public_host: String,

    #[serde(default = "default_docker_network")]
    pub docker_network: Option<String>,

    /// Remove managed containers left by an earlier process at startup.
    #[serde(default = "default_reclaim_orphans")]
    pub reclaim_orphans: bool,
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn default_bind_addr() -> String {
    std::env::var("LAB_API_BIND").unwrap_or_else(|_| "0.0.0.0:3131".to_string())
}

fn default_catalog_path() -> PathBuf {
    std::env::var("LAB_API_CATALOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./labs.yaml"))
}

fn default_janitor_interval() -> u64 {
    env_u64("LAB_API_JANITOR_INTERVAL").unwrap_or(300) // 5 minutes
}

fn default_pause_after() -> Option<u64> {
    env_u64("LAB_API_PAUSE_AFTER")
}

fn default_delete_after() -> u64 {
    env_u64("LAB_API_DELETE_AFTER").unwrap_or(4 * 60 * 60)
}

fn default_driver_timeout() -> u64 {
    env_u64("LAB_API_DRIVER_TIMEOUT").unwrap_or(120)
}

fn default_public_host() -> String {
    std::env::var("LAB_API_PUBLIC_HOST").unwrap_or_else(|_| "localhost".to_string())
}

fn default_docker_network() -> Option<String> {
    std::env::var("LAB_API_DOCKER_NETWORK")
        .ok()
        .filter(|network| !network.trim().is_empty())
}

fn default_reclaim_orphans() -> bool {
    std::env::var("LAB_API_RECLAIM_ORPHANS")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            catalog_path: default_catalog_path(),
            janitor_interval_secs: default_janitor_interval(),
            pause_after_secs: default_pause_after(),
            delete_after_secs: default_delete_after(),
            driver_timeout_secs: default_driver_timeout(),
            public_host: default_public_host(),
            docker_network: default_docker_network(),
            reclaim_orphans: default_reclaim_orphans(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.max(1))
    }

    pub fn reaper_policy(&self) -> ReaperPolicy {
        ReaperPolicy {
            pause_after: self.pause_after_secs.map(Duration::from_secs),
            delete_after: Duration::from_secs(self.delete_after_secs),
        }
    }

    pub fn orchestrator_config(&self, courses: CourseCatalog) -> OrchestratorConfig {
        OrchestratorConfig {
            driver_timeout_secs: self.driver_timeout_secs,
            ..OrchestratorConfig::new(courses)
        }
    }

    pub fn docker_config(&self) -> DockerDriverConfig {
        DockerDriverConfig {
            public_host: self.public_host.clone(),
            network: self.docker_network.clone(),
            ..DockerDriverConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_follows_settings() {
        let config = Config {
            pause_after_secs: Some(900),
            delete_after_secs: 3600,
            ..Config::default()
        };
        let policy = config.reaper_policy();
        assert_eq!(policy.pause_after, Some(Duration::from_secs(900)));
        assert_eq!(policy.delete_after, Duration::from_secs(3600));
    }

    #[test]
    fn janitor_interval_is_never_zero() {
        let config = Config {
            janitor_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.janitor_interval(), Duration::from_secs(1));
    }

    #[test]
    fn driver_settings_are_forwarded() {
        let config = Config {
            public_host: "labs.example.edu".to_string(),
            docker_network: Some("labs".to_string()),
            driver_timeout_secs: 30,
            ..Config::default()
        };
        let docker = config.docker_config();
        assert_eq!(docker.public_host, "labs.example.edu");
        assert_eq!(docker.network.as_deref(), Some("labs"));
        assert_eq!(docker.executable, "docker");

        let orchestrator = config.orchestrator_config(CourseCatalog::new());
        assert_eq!(orchestrator.driver_timeout_secs, 30);
        assert_eq!(orchestrator.instructor_owner, "instructor");
    }
}
