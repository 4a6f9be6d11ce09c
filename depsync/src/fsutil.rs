//! Filesystem helpers with path-carrying errors.
//!
//! Every failure here is fatal to a run, so each helper maps `io::Error`
//! into the matching [`SyncError`] variant with the offending path attached.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{SyncError, SyncResult};

/// Suffix of files that are being written and not yet verified.
pub const INCOMING_SUFFIX: &str = ".incoming";

/// Path with `suffix` appended to the file name.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Sibling path used while a file is being downloaded.
pub fn incoming_path(path: &Path) -> PathBuf {
    with_suffix(path, INCOMING_SUFFIX)
}

/// Delete a file, treating a missing file as success.
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> SyncResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::DeleteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Rename a file, replacing any existing target.
pub fn rename(from: &Path, to: &Path) -> SyncResult<()> {
    fs::rename(from, to).map_err(|e| SyncError::RenameFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}

/// Create the parent directory of `path` if needed.
pub fn create_parent_dir(path: &Path) -> SyncResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| SyncError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        _ => Ok(()),
    }
}

/// Create a directory and all of its parents.
pub fn create_dir_all(path: &Path) -> SyncResult<()> {
    fs::create_dir_all(path).map_err(|e| SyncError::CreateDirFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Last write time of a file in nanoseconds since the Unix epoch.
pub fn modified_nanos(path: &Path) -> SyncResult<u64> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| SyncError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0))
}

/// Create a file that the platform treats as hidden.
///
/// Dotfiles are already hidden on Unix; on Windows the hidden attribute is
/// set at creation time.
pub fn create_hidden(path: &Path) -> SyncResult<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        options.attributes(FILE_ATTRIBUTE_HIDDEN);
    }

    options.open(path).map_err(|e| SyncError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Give execute permission to every class that can read the file.
///
/// Returns whether the mode changed. A no-op off Unix.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> SyncResult<bool> {
    use std::os::unix::fs::PermissionsExt;

    const EXECUTE_BITS: u32 = 0o111;

    let metadata = fs::metadata(path).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    let current = metadata.permissions().mode();
    let desired = current | ((current >> 2) & EXECUTE_BITS);

    if current == desired {
        return Ok(false);
    }

    fs::set_permissions(path, fs::Permissions::from_mode(desired)).map_err(|e| {
        SyncError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    Ok(true)
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> SyncResult<bool> {
    Ok(false)
}

/// A destination file being written under its `.incoming` name.
///
/// The file only appears under its final name through [`commit`], which the
/// caller invokes after verifying the contents. Dropping an uncommitted guard
/// removes the partial `.incoming` file.
///
/// [`commit`]: IncomingFile::commit
#[derive(Debug)]
pub struct IncomingFile {
    final_path: PathBuf,
    incoming_path: PathBuf,
    file: Option<File>,
}

impl IncomingFile {
    /// Create `<final_path>.incoming`, creating parent directories as needed.
    pub fn create(final_path: &Path) -> SyncResult<Self> {
        create_parent_dir(final_path)?;
        let incoming_path = incoming_path(final_path);
        let file = File::create(&incoming_path).map_err(|e| SyncError::WriteFailed {
            path: incoming_path.clone(),
            source: e,
        })?;

        Ok(Self {
            final_path: final_path.to_path_buf(),
            incoming_path,
            file: Some(file),
        })
    }

    /// Path the file will have once committed.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Path of the partial file.
    pub fn incoming_path(&self) -> &Path {
        &self.incoming_path
    }

    /// Flush, close and move the file to its final name.
    pub fn commit(mut self) -> SyncResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| SyncError::WriteFailed {
                path: self.incoming_path.clone(),
                source: e,
            })?;
        }
        rename(&self.incoming_path, &self.final_path)?;
        self.incoming_path.clear();
        Ok(())
    }
}

impl Write for IncomingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "incoming file closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for IncomingFile {
    fn drop(&mut self) {
        self.file.take();
        if !self.incoming_path.as_os_str().is_empty() {
            fs::remove_file(&self.incoming_path).ok();
        }
    }
}
