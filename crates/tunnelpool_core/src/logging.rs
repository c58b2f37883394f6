//! Structured logging setup with console and file output.
//!
//! Interactive runs log to the console only. Detached runs (stdout not a
//! terminal) also write a daily rotating file under [`log_dir`], falling back
//! to the console when the file cannot be opened. The filter comes from
//! `--log-filter`, then `TUNNELPOOL_LOG`, then `RUST_LOG`, then the build
//! default.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a custom log filter.
pub const LOG_ENV: &str = "TUNNELPOOL_LOG";

/// Prefix of the rotated log files (`tunnelpool.YYYY-MM-DD.log`).
const LOG_FILE_PREFIX: &str = "tunnelpool";

type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Where log output goes and how it is filtered.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for rotated log files; `None` logs to the console only.
    pub file_dir: Option<PathBuf>,
    /// Filter directive overriding the environment.
    pub filter: Option<String>,
}

impl LogConfig {
    /// Console-only when stdout is a terminal, console plus file otherwise.
    pub fn detect() -> Self {
        let file_dir = (!atty::is(atty::Stream::Stdout)).then(log_dir);
        Self { file_dir, filter: None }
    }

    /// Console output only.
    pub fn console() -> Self {
        Self { file_dir: None, filter: None }
    }

    /// Also write rotated files into `dir`.
    pub fn with_file_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_dir = Some(dir.into());
        self
    }

    /// Use `filter` instead of the environment.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Keeps the file writer alive; dropping it flushes pending entries.
pub struct LoggingGuard {
    worker_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether log entries are also written to a file.
    pub fn writes_file(&self) -> bool {
        self.worker_guard.is_some()
    }
}

/// Install the global subscriber described by `config`.
///
/// A subscriber that is already installed (e.g. by an embedding app) is left
/// in place.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    let filter = config.filter.as_deref();

    let Some(dir) = &config.file_dir else {
        init_console(filter);
        return LoggingGuard { worker_guard: None };
    };

    match init_console_and_file(dir, filter) {
        Ok(guard) => LoggingGuard { worker_guard: Some(guard) },
        Err(e) => {
            eprintln!(
                "Warning: file logging unavailable in {}: {e}. Using console only.",
                dir.display()
            );
            init_console(filter);
            LoggingGuard { worker_guard: None }
        }
    }
}

fn init_console(filter: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(filter))
        .with_ansi(true)
        .with_target(false)
        .try_init();
}

fn init_console_and_file(dir: &Path, filter: Option<&str>) -> Result<WorkerGuard, InitError> {
    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    // The console only shows INFO and above; the file gets everything the filter allows.
    let writer = std::io::stdout.with_max_level(tracing::Level::INFO).and(file_writer);

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(build_env_filter(filter))
        .with_ansi(false)
        .with_target(true)
        .try_init()?;

    Ok(guard)
}

fn build_env_filter(custom: Option<&str>) -> EnvFilter {
    let fallback = || EnvFilter::new(default_log_filter());

    match custom {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
        None => EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| fallback()),
    }
}

/// Default filter: verbose for this workspace in debug builds, quiet
/// driver and SSH internals always.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "debug,tunnelpool=trace,tunnelpool_core=trace,tokio_postgres=warn,russh=warn"
    } else {
        "info,tokio_postgres=warn,russh=warn"
    }
}

/// Default directory for rotated log files.
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tunnelpool")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_ends_with_app_name() {
        assert!(log_dir().ends_with("tunnelpool/logs"));
    }

    #[test]
    fn test_custom_filter_is_used() {
        let filter = build_env_filter(Some("warn,tunnelpool_core=debug"));
        assert!(filter.to_string().contains("tunnelpool_core=debug"));
    }

    #[test]
    fn test_invalid_custom_filter_falls_back() {
        let filter = build_env_filter(Some("tunnelpool=loudest"));
        assert!(filter.to_string().contains("tokio_postgres=warn"));
    }

    #[test]
    fn test_builders() {
        let config = LogConfig::console().with_filter("info").with_file_dir("/var/log/tunnelpool");
        assert_eq!(config.filter.as_deref(), Some("info"));
        assert_eq!(config.file_dir.as_deref(), Some(Path::new("/var/log/tunnelpool")));
    }

    #[test]
    fn test_file_logging_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("logs");

        // Whether this test or another installs the global subscriber first,
        // the directory is created and init never panics.
        let guard = init_logging(LogConfig::console().with_file_dir(&dir).with_filter("info"));
        tracing::info!("file logging test entry");
        drop(guard);

        assert!(dir.is_dir());
    }
}
