//! Lab workspace lifecycle orchestration
//!
//! This crate owns the workspace state machine, the in-memory registry of
//! workspaces and the idle reaper. It is consumed by the lab-api HTTP service but
//! only depends on the [`lab_driver::ContainerDriver`] contract, so any entry point
//! (tests, background workers) can drive it with its own driver.

pub mod clock;
pub mod config;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod reaper;
pub mod registry;
pub mod workspace;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, CourseCatalog, CourseImage, OrchestratorConfig};
pub use error::{ErrorKind, Operation, OrchestratorError, Result, Stage};
pub use orchestrator::{LifecycleOrchestrator, ShutdownReport};
pub use reaper::{IdleReaper, ReaperPolicy, SweepReport};
pub use registry::WorkspaceRegistry;
pub use workspace::{CourseOverview, Workspace, WorkspaceKey, WorkspaceStatus};

pub use lab_driver::ResourceProfile;
