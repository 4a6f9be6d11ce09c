//! SHA-1 content digests.
//!
//! One digest is used for every identity check in the crate: pack payloads,
//! extracted blobs and files rehashed during reconciliation. Digests are
//! carried as lowercase hex so that comparisons are case-insensitive no
//! matter how a manifest spelled them.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{SyncError, SyncResult};

/// Buffer size for reading files during hashing (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// A lowercase hex SHA-1 digest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap a hex digest, normalizing it to lowercase.
    pub fn new(hex: impl AsRef<str>) -> Self {
        Self(hex.as_ref().trim().to_ascii_lowercase())
    }

    /// Hash a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// The digest as lowercase hex.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the digest is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First two hex characters, used to fan out cache directories.
    pub fn prefix(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }
}

impl From<String> for ContentHash {
    fn from(hex: String) -> Self {
        Self::new(hex)
    }
}

impl From<&str> for ContentHash {
    fn from(hex: &str) -> Self {
        Self::new(hex)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0.get(..12).unwrap_or(&self.0))
    }
}

/// Incremental hasher for data that arrives in chunks.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha1,
}

impl ContentHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    /// Feed more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest.
    pub fn finish(self) -> ContentHash {
        ContentHash(format!("{:x}", self.inner.finalize()))
    }
}

/// Calculate the digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> SyncResult<ContentHash> {
    let mut file = File::open(path).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| SyncError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finish())
}

/// Verify that a file on disk has the expected digest.
///
/// `Ok(())` if it matches, `BlobHashMismatch` if it doesn't, or a read error.
pub fn verify_file(path: &Path, expected: &ContentHash) -> SyncResult<()> {
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(SyncError::BlobHashMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// SHA-1 of "hello world".
    const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    #[test]
    fn test_hash_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"hello world").unwrap();

        let hash = hash_file(&file_path).unwrap();
        assert_eq!(hash.as_str(), HELLO_SHA1);
    }

    #[test]
    fn test_hash_empty_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("empty.txt");
        File::create(&file_path).unwrap();

        let hash = hash_file(&file_path).unwrap();

        // SHA-1 of empty string
        assert_eq!(hash.as_str(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_hash_nonexistent_file() {
        let result = hash_file(Path::new("/nonexistent/file.bin"));
        assert!(matches!(result, Err(SyncError::ReadFailed { .. })));
    }

    #[test]
    fn test_hash_comparison_ignores_case() {
        let upper = ContentHash::new(HELLO_SHA1.to_ascii_uppercase());
        assert_eq!(upper, ContentHash::from(HELLO_SHA1));
        assert_eq!(upper.as_str(), HELLO_SHA1);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish(), ContentHash::of_bytes(b"hello world"));
    }

    #[test]
    fn test_large_file_crosses_buffer_boundary() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("large.bin");

        let data = vec![0xABu8; 100_000];
        std::fs::write(&file_path, &data).unwrap();

        assert_eq!(hash_file(&file_path).unwrap(), ContentHash::of_bytes(&data));
    }

    #[test]
    fn test_verify_file_mismatch() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        std::fs::write(&file_path, b"hello world").unwrap();

        assert!(verify_file(&file_path, &ContentHash::new(HELLO_SHA1)).is_ok());

        match verify_file(&file_path, &ContentHash::new("0000")) {
            Err(SyncError::BlobHashMismatch { actual, .. }) => assert_eq!(actual, HELLO_SHA1),
            other => panic!("Expected BlobHashMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_serde_normalizes_case() {
        let hash: ContentHash = serde_json::from_str("\"ABCDEF\"").unwrap();
        assert_eq!(hash.as_str(), "abcdef");
        assert_eq!(serde_json::to_string(&hash).unwrap(), "\"abcdef\"");
    }

    #[test]
    fn test_prefix() {
        assert_eq!(ContentHash::new("ABCD").prefix(), "ab");
        assert_eq!(ContentHash::new("a").prefix(), "a");
    }
}
