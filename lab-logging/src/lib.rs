//! Tracing subscriber setup shared by the lab binaries.
//!
//! Configured from the environment:
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `LAB_LOG_LEVEL` | any `EnvFilter` directive | `info` |
//! | `LAB_LOG_FORMAT` | `human`, `json` | `human` |
//! | `LAB_LOG_OUTPUT` | `console`, `file`, `both` | `console` |
//! | `LAB_LOG_FILE` | path of the log file | `/tmp/lab-api.log` |
//!
//! `RUST_LOG`, when set, takes precedence over `LAB_LOG_LEVEL`.

use std::env;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, registry, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            output: LogOutput::Console,
            file: PathBuf::from("/tmp/lab-api.log"),
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any variable source. Unknown values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let format = match lookup("LAB_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };
        let output = match lookup("LAB_LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Console,
        };

        Self {
            level: lookup("LAB_LOG_LEVEL")
                .filter(|level| !level.trim().is_empty())
                .unwrap_or(defaults.level),
            format,
            output,
            file: lookup("LAB_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for noisy in ["tokio=warn", "hyper=warn"] {
            if let Ok(directive) = noisy.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// Install the global subscriber described by `LAB_LOG_*`.
///
/// Keep the returned guard alive for as long as the process logs to a file;
/// dropping it flushes and stops the background writer.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let json = settings.format == LogFormat::Json;
    let mut layers = Vec::new();
    let mut guard = None;

    if settings.output.console() {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
        layers.push(if json { layer.json().boxed() } else { layer.pretty().boxed() });
    }

    if settings.output.file() {
        let dir = settings.file.parent().unwrap_or_else(|| Path::new("/tmp"));
        let name = settings
            .file
            .file_name()
            .unwrap_or_else(|| "lab-api.log".as_ref());
        let (writer, worker) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
        guard = Some(worker);

        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        layers.push(if json { layer.json().boxed() } else { layer.boxed() });
    }

    // A subscriber may already be installed, e.g. by a test harness
    let _ = registry()
        .with(layers)
        .with(settings.env_filter())
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_human_console_output() {
        assert_eq!(settings(&[]), LogSettings::default());
    }

    #[test]
    fn reads_format_output_and_file() {
        let parsed = settings(&[
            ("LAB_LOG_LEVEL", "debug"),
            ("LAB_LOG_FORMAT", "json"),
            ("LAB_LOG_OUTPUT", "both"),
            ("LAB_LOG_FILE", "/var/log/lab/api.log"),
        ]);
        assert_eq!(parsed.level, "debug");
        assert_eq!(parsed.format, LogFormat::Json);
        assert_eq!(parsed.output, LogOutput::Both);
        assert_eq!(parsed.file, PathBuf::from("/var/log/lab/api.log"));
    }

    #[test]
    fn unknown_values_fall_back() {
        let parsed = settings(&[
            ("LAB_LOG_FORMAT", "xml"),
            ("LAB_LOG_OUTPUT", "syslog"),
            ("LAB_LOG_LEVEL", " "),
        ]);
        assert_eq!(parsed.format, LogFormat::Human);
        assert_eq!(parsed.output, LogOutput::Console);
        assert_eq!(parsed.level, "info");
    }

    #[test]
    fn file_output_returns_guard() {
        let guard = init_with(&LogSettings {
            output: LogOutput::File,
            file: std::env::temp_dir().join("lab-logging-test.log"),
            ..LogSettings::default()
        });
        assert!(guard.is_some());
    }
}
