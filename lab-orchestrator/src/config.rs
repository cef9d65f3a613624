//! Course catalog and orchestrator settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lab_driver::ResourceProfile;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Owner id used for workspaces created through the instructor endpoint.
pub const DEFAULT_INSTRUCTOR_OWNER: &str = "instructor";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse course catalog: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What to run for one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseImage {
    pub image: String,
    /// IDE name to the port it listens on inside the container.
    pub ides: BTreeMap<String, u16>,
    #[serde(default)]
    pub default_profile: ResourceProfile,
}

/// Course id to course image, loaded from YAML:
///
/// ```yaml
/// cs101:
///   image: registry.local/labs/cs101:2024
///   ides:
///     editor: 8443
///     notebook: 8888
///   default_profile:
///     cpu_millicores: 1000
///     memory_mb: 2048
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseCatalog {
    courses: BTreeMap<String, CourseImage>,
}

impl CourseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(mut self, course_id: impl Into<String>, course: CourseImage) -> Self {
        self.courses.insert(course_id.into(), course);
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let catalog: CourseCatalog = serde_yaml_ng::from_str(yaml)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn get(&self, course_id: &str) -> Option<&CourseImage> {
        self.courses.get(course_id)
    }

    pub fn course_ids(&self) -> impl Iterator<Item = &str> {
        self.courses.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (course_id, course) in &self.courses {
            if course_id.trim().is_empty() {
                return Err(ConfigError::Invalid("course id must not be empty".to_string()));
            }
            if course.image.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "course '{course_id}' has no image"
                )));
            }
            if course.ides.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "course '{course_id}' exposes no IDEs"
                )));
            }
            if course.default_profile.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "course '{course_id}' has an empty default profile"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub courses: CourseCatalog,

    /// Largest profile any workspace may request.
    #[serde(default = "default_resource_ceiling")]
    pub resource_ceiling: ResourceProfile,

    /// Upper bound for a single driver call.
    #[serde(default = "default_driver_timeout_secs")]
    pub driver_timeout_secs: u64,

    #[serde(default = "default_instructor_owner")]
    pub instructor_owner: String,
}

fn default_resource_ceiling() -> ResourceProfile {
    ResourceProfile::new(4000, 8192)
}

fn default_driver_timeout_secs() -> u64 {
    120
}

fn default_instructor_owner() -> String {
    DEFAULT_INSTRUCTOR_OWNER.to_string()
}

impl OrchestratorConfig {
    pub fn new(courses: CourseCatalog) -> Self {
        Self {
            courses,
            resource_ceiling: default_resource_ceiling(),
            driver_timeout_secs: default_driver_timeout_secs(),
            instructor_owner: default_instructor_owner(),
        }
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.courses.validate()?;
        if self.driver_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "driver timeout must be at least one second".to_string(),
            ));
        }
        if self.instructor_owner.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "instructor owner must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
