//! Logging setup.
//!
//! Console output goes to stderr at `info` (or `debug` when verbose). An
//! optional log file receives the same events without ANSI colours, written
//! from a background thread. `RUST_LOG` overrides the level when set.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

use crate::config::ConfigError;

/// Keeps the file writer alive. Hold it until the program exits, or
/// buffered log lines may be lost.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Default filter directive for the given verbosity.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the global subscriber.
///
/// Does nothing beyond returning a guard if a subscriber is already set.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<LoggingGuard, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    Ok(LoggingGuard { _file: guard })
}

/// Open `path` for appending, creating its directory.
fn open_log_file(path: &Path) -> Result<RollingFileAppender, ConfigError> {
    let log_error = |reason: String| ConfigError::LogFile {
        path: path.to_path_buf(),
        reason,
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| log_error("not a file path".to_string()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .map_err(|e| log_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs/depsync.log");

        open_log_file(&path).unwrap();

        assert!(temp.path().join("logs").is_dir());
    }

    #[test]
    fn test_directory_is_not_a_log_file() {
        assert!(matches!(
            open_log_file(Path::new("/")),
            Err(ConfigError::LogFile { .. })
        ));
    }
}
