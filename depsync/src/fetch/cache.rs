//! Local cache of verified compressed packs.
//!
//! Packs are stored under `<dir>/<first two hex digits>/<hash>` exactly as
//! they came off the wire. An entry only appears under its final name after
//! the pack payload verified, so a present entry is either correct or was
//! damaged after the fact; the fetcher rechecks it on every use.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SyncResult;
use crate::fsutil::{self, IncomingFile};
use crate::hash::ContentHash;

/// Name of the cache directory inside `.git`.
pub const CACHE_DIR_NAME: &str = "depsync";

/// Default cache location for a root: `<repo>/.git/depsync` for the closest
/// ancestor of `root` that has a `.git` directory.
pub fn discover_cache_dir(root: &Path) -> Option<PathBuf> {
    root.ancestors()
        .map(|dir| dir.join(".git"))
        .find(|git| git.is_dir())
        .map(|git| git.join(CACHE_DIR_NAME))
}

/// A directory of cached packs.
#[derive(Debug, Clone)]
pub struct PackCache {
    dir: PathBuf,
}

impl PackCache {
    /// Use `dir` as the cache directory. It is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the entry for `hash`.
    pub fn entry_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.prefix()).join(hash.as_str())
    }

    /// Open the entry for `hash` if present with the expected length.
    pub fn open(&self, hash: &ContentHash, compressed_size: u64) -> Option<File> {
        let path = self.entry_path(hash);
        let len = fs::metadata(&path).ok()?.len();
        if len != compressed_size {
            debug!(pack = %hash, len, compressed_size, "Ignoring cached pack with wrong size");
            return None;
        }
        File::open(&path).ok()
    }

    /// Start writing a new entry for `hash`.
    ///
    /// The entry becomes visible when the returned guard is committed.
    pub fn begin(&self, hash: &ContentHash) -> SyncResult<IncomingFile> {
        IncomingFile::create(&self.entry_path(hash))
    }

    /// Delete the entry for `hash`.
    pub fn evict(&self, hash: &ContentHash) -> SyncResult<bool> {
        fsutil::remove_file_if_exists(&self.entry_path(hash))
    }
}
