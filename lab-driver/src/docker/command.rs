//! Docker command abstraction and builder utilities.
//!
//! Every call to the `docker` CLI goes through [`DockerCommand`], which gives
//! consistent logging and maps a failed invocation onto the [`DriverError`]
//! taxonomy so callers can tell transient backend trouble from real failures.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::{DriverError, DriverOp, Result};

/// Fragments of CLI stderr that indicate the daemon could not be reached in time.
const TRANSIENT_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "connection refused",
    "connection reset",
    "i/o timeout",
    "tls handshake timeout",
    "context deadline exceeded",
    "temporarily unavailable",
];

/// Builder for Docker commands with fluent interface and consistent error handling.
#[derive(Debug, Clone)]
pub(crate) struct DockerCommand {
    executable: String,
    operation: DriverOp,
    subcommand: Option<String>,
    args: Vec<String>,
}

impl DockerCommand {
    /// Create a builder for a command issued on behalf of `operation`.
    pub fn new(executable: &str, operation: DriverOp) -> Self {
        Self {
            executable: executable.to_string(),
            operation,
            subcommand: None,
            args: Vec::new(),
        }
    }

    /// Set the Docker subcommand (e.g., "ps", "create", "port").
    pub fn subcommand<S: Into<String>>(mut self, cmd: S) -> Self {
        self.subcommand = Some(cmd.into());
        self
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Execute the command, discarding its output.
    pub async fn execute(self) -> Result<()> {
        self.execute_with_output().await.map(|_| ())
    }

    /// Execute the command and return its stdout.
    ///
    /// The child is killed if the returned future is dropped, so a caller-side
    /// timeout does not leave a stray `docker` process behind.
    pub async fn execute_with_output(self) -> Result<String> {
        let operation = self.operation;
        let mut cmd = self.build_command();

        debug!(%operation, command = ?cmd, "Executing Docker command");

        let output = cmd.output().await.map_err(|e| DriverError::Lifecycle {
            operation,
            reason: format!("failed to execute docker: {e}"),
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(%operation, status = %output.status, stderr = %stderr.trim(), "Docker command failed");
            Err(classify_failure(operation, &stderr))
        }
    }

    fn build_command(self) -> Command {
        let mut cmd = Command::new(&self.executable);

        if let Some(subcmd) = self.subcommand {
            cmd.arg(subcmd);
        }

        cmd.args(self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

/// Map the stderr of a failed Docker invocation onto a [`DriverError`].
pub(crate) fn classify_failure(operation: DriverOp, stderr: &str) -> DriverError {
    let reason = stderr.trim().to_string();
    let lower = reason.to_lowercase();

    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        DriverError::Transient { operation, reason }
    } else if lower.contains("no such container") {
        DriverError::ContainerNotFound(reason)
    } else if lower.contains("network") && (lower.contains("not found") || lower.contains("failed to")) {
        DriverError::Network(reason)
    } else {
        DriverError::Lifecycle { operation, reason }
    }
}
