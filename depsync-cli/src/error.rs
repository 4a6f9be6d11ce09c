//! CLI error type and exit codes.

use std::fmt;

use depsync::{ConfigError, SyncError};

/// Exit code for a successful run.
pub const EXIT_OK: i32 = 0;

/// Exit code for any failure.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when modified files kept required updates from happening.
pub const EXIT_BLOCKED: i32 = 2;

/// Errors surfaced by the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Invalid configuration or arguments.
    Config(String),
    /// The synchronization failed.
    Sync(SyncError),
    /// Locally modified files were not updated.
    Blocked(usize),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Blocked(_) => EXIT_BLOCKED,
            CliError::Config(_) | CliError::Sync(_) => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::Sync(SyncError::Cancelled) => write!(f, "Cancelled"),
            CliError::Sync(e) => write!(f, "{}", e),
            CliError::Blocked(count) => write!(
                f,
                "{} modified file(s) were not updated; use --force to overwrite or --prompt to choose",
                count
            ),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Sync(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        CliError::Sync(e)
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Blocked(1).exit_code(), EXIT_BLOCKED);
        assert_eq!(CliError::Config("bad".to_string()).exit_code(), EXIT_FAILURE);
        assert_eq!(CliError::Sync(SyncError::Cancelled).exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_blocked_message_mentions_force() {
        assert!(CliError::Blocked(3).to_string().contains("--force"));
    }
}
