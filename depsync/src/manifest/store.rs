//! Reading and writing manifest documents.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::model::{TargetManifest, TargetSet, WorkingManifest};
use crate::error::{SyncError, SyncResult};
use crate::fsutil;

/// File name of the working manifest at the root of the synchronized tree.
pub const WORKING_MANIFEST_NAME: &str = ".gitdeps";

/// Suffix of the temporary file used to replace the working manifest.
pub const TEMP_MANIFEST_SUFFIX: &str = ".tmp";

/// Extension of target manifest documents.
pub const TARGET_MANIFEST_EXTENSION: &str = ".gitdeps.json";

/// Directory inside each module that holds its target manifests.
pub const BUILD_DIR_NAME: &str = "Build";

/// Manifest persistence for one root directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
    working_path: PathBuf,
}

impl ManifestStore {
    /// Create a store for the tree at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let working_path = root.join(WORKING_MANIFEST_NAME);
        Self { root, working_path }
    }

    /// Root of the synchronized tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the working manifest.
    pub fn working_path(&self) -> &Path {
        &self.working_path
    }

    /// Path of the temporary file used during a save.
    pub fn temp_path(&self) -> PathBuf {
        fsutil::with_suffix(&self.working_path, TEMP_MANIFEST_SUFFIX)
    }

    /// Find every target manifest document, in a stable order.
    ///
    /// Looks in `<root>/<module>/Build/*.gitdeps.json`, skipping dotfiles.
    pub fn target_manifest_paths(&self) -> SyncResult<Vec<PathBuf>> {
        let pattern = format!(
            "{}/*/{}/*{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            BUILD_DIR_NAME,
            TARGET_MANIFEST_EXTENSION
        );

        let entries = glob::glob(&pattern).map_err(|e| SyncError::ManifestRead {
            path: self.root.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SyncError::ManifestRead {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            let is_dotfile = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if !is_dotfile && path.is_file() {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Load and merge every target manifest under the root.
    ///
    /// Target manifests define the required state, so any unreadable or
    /// malformed document fails the whole load.
    pub fn load_targets(&self) -> SyncResult<TargetSet> {
        let mut targets = TargetSet::new();

        for path in self.target_manifest_paths()? {
            debug!(manifest = %path.display(), "Reading target manifest");
            targets.merge(read_target_manifest(&path)?);
        }

        info!(
            files = targets.files.len(),
            blobs = targets.blobs.len(),
            packs = targets.packs.len(),
            "Loaded target manifests"
        );
        Ok(targets)
    }

    /// Finish a save that was interrupted before its rename.
    ///
    /// If the temporary file exists and the working manifest does not, the
    /// temporary file is promoted. A half-written one then fails to parse and
    /// is treated like any unreadable manifest. Returns whether a recovery
    /// happened.
    pub fn recover_interrupted_save(&self) -> SyncResult<bool> {
        let temp_path = self.temp_path();
        if temp_path.exists() && !self.working_path.exists() {
            warn!(
                path = %temp_path.display(),
                "Recovering working manifest from interrupted save"
            );
            fsutil::rename(&temp_path, &self.working_path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Load the working manifest.
    ///
    /// A missing or unreadable manifest is treated as a first run and yields
    /// an empty manifest; every file will be rehashed or downloaded.
    pub fn load_working(&self) -> WorkingManifest {
        if !self.working_path.exists() {
            debug!(path = %self.working_path.display(), "No working manifest, first run");
            return WorkingManifest::new();
        }

        match read_working_manifest(&self.working_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable working manifest");
                WorkingManifest::new()
            }
        }
    }

    /// Persist the working manifest without ever losing the previous one.
    ///
    /// The document is written and synced to a hidden temporary file, which
    /// then replaces the manifest in a single rename. If any step fails the
    /// previous manifest is left untouched.
    pub fn save_working(&self, manifest: &WorkingManifest) -> SyncResult<()> {
        let temp_path = self.temp_path();

        let file = fsutil::create_hidden(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, manifest).map_err(|e| {
            SyncError::ManifestWrite {
                path: temp_path.clone(),
                reason: e.to_string(),
            }
        })?;
        let file = writer.into_inner().map_err(|e| SyncError::WriteFailed {
            path: temp_path.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|e| SyncError::WriteFailed {
            path: temp_path.clone(),
            source: e,
        })?;
        drop(file);

        fsutil::rename(&temp_path, &self.working_path)?;
        debug!(
            path = %self.working_path.display(),
            files = manifest.files.len(),
            "Saved working manifest"
        );
        Ok(())
    }

    /// Delete `.incoming` leftovers of downloads that never completed.
    ///
    /// Only records that were never written are considered, since a file
    /// that completed has no reason to leave an `.incoming` sibling behind.
    pub fn remove_stale_incoming(&self, manifest: &WorkingManifest) -> SyncResult<usize> {
        let mut removed = 0;
        for file in manifest.files.iter().filter(|f| !f.was_written()) {
            let incoming = fsutil::incoming_path(&self.root.join(&file.name));
            if fsutil::remove_file_if_exists(&incoming)? {
                debug!(file = %file.name, "Removed stale incoming file");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_target_manifest(path: &Path) -> SyncResult<TargetManifest> {
    let file = File::open(path).map_err(|e| SyncError::ManifestRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| SyncError::ManifestParse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read_working_manifest(path: &Path) -> SyncResult<WorkingManifest> {
    let contents = fs::read(path).map_err(|e| SyncError::ManifestRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&contents).map_err(|e| SyncError::ManifestParse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write a target manifest document, creating its directory.
///
/// Used by tooling that authors manifests and by tests.
pub fn write_target_manifest(path: &Path, manifest: &TargetManifest) -> SyncResult<()> {
    fsutil::create_parent_dir(path)?;
    let file = File::create(path).map_err(|e| SyncError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, manifest).map_err(|e| SyncError::ManifestWrite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    writer.flush().map_err(|e| SyncError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}
