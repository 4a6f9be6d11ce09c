//! Error types for dependency synchronization.
//!
//! Errors fall into five groups, and the group decides what the run does next:
//!
//! | Group        | Variants                                         | Policy                  |
//! |--------------|--------------------------------------------------|-------------------------|
//! | Manifest     | `ManifestRead`, `ManifestParse`, `Missing*`      | fatal for target docs   |
//! | Integrity    | `PackHashMismatch`, `BlobHashMismatch`, ...      | fatal, never retried    |
//! | Transport    | `Transport`, `StreamCorrupt`, `DownloadFailed`   | retried, then fatal     |
//! | Filesystem   | `ReadFailed`, `WriteFailed`, `DeleteFailed`, ... | fatal, surfaced at once |
//! | Control      | `Cancelled`                                      | stops the run           |
//!
//! Tampered files are not errors; they are reported through
//! [`SyncReport`](crate::sync::SyncReport).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing dependencies.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A manifest document could not be read.
    #[error("failed to read manifest {}: {source}", path.display())]
    ManifestRead { path: PathBuf, source: io::Error },

    /// A manifest document could not be parsed.
    #[error("failed to parse manifest {}: {source}", path.display())]
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The working manifest could not be serialized.
    #[error("failed to write manifest {}: {reason}", path.display())]
    ManifestWrite { path: PathBuf, reason: String },

    /// A required file references a blob no manifest declares.
    #[error("no blob {hash} declared for {file}")]
    MissingBlob { file: String, hash: String },

    /// A required blob references a pack no manifest declares.
    #[error("no pack {hash} declared for blob {blob}")]
    MissingPack { blob: String, hash: String },

    /// The decompressed pack payload did not match its declared hash.
    #[error("incorrect hash for {url}: expected {expected}, got {actual}")]
    PackHashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// Bytes extracted for a blob did not match the blob hash.
    #[error("incorrect hash for {}: expected {expected}, got {actual}", path.display())]
    BlobHashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The pack is shorter than the blob ranges it should contain.
    #[error("pack {pack} ends before blob {blob} (offset {offset}, size {size})")]
    BlobOutOfRange {
        pack: String,
        blob: String,
        offset: u64,
        size: u64,
    },

    /// A request could not be made or the server refused it.
    #[error("failed to fetch {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The pack stream broke off or could not be decompressed.
    #[error("corrupt or truncated stream from {url}: {source}")]
    StreamCorrupt { url: String, source: io::Error },

    /// A pack kept failing after all retries.
    #[error("failed to download '{url}' after {attempts} attempts: {source}")]
    DownloadFailed {
        url: String,
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    /// Failed to read a file.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to delete a file.
    #[error("failed to delete {}: {source}", path.display())]
    DeleteFailed { path: PathBuf, source: io::Error },

    /// Failed to rename a file.
    #[error("failed to rename {} to {}: {source}", from.display(), to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// The run was cancelled before it completed.
    #[error("synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether another attempt at the same operation could succeed.
    ///
    /// Only network-level failures qualify. Hash mismatches are deterministic
    /// for the same bytes, and filesystem errors indicate a local problem
    /// that retrying would not fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::StreamCorrupt { .. })
    }

    /// Whether this error is an integrity failure.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::PackHashMismatch { .. } | Self::BlobHashMismatch { .. } | Self::BlobOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        let err = SyncError::Transport {
            url: "http://cdn/pack".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(err.is_retryable());

        let err = SyncError::StreamCorrupt {
            url: "http://cdn/pack".to_string(),
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_integrity_errors_are_not_retryable() {
        let err = SyncError::PackHashMismatch {
            url: "http://cdn/pack".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_integrity());
    }

    #[test]
    fn test_filesystem_errors_are_not_retryable() {
        let err = SyncError::DeleteFailed {
            path: PathBuf::from("SDK/lib.bin"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_integrity());
    }

    #[test]
    fn test_download_failed_display() {
        let err = SyncError::DownloadFailed {
            url: "http://cdn/deps/abc".to_string(),
            attempts: 5,
            source: Box::new(SyncError::Transport {
                url: "http://cdn/deps/abc".to_string(),
                reason: "timed out".to_string(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("http://cdn/deps/abc"));
        assert!(msg.contains("5 attempts"));
        assert!(msg.contains("timed out"));
    }
}
