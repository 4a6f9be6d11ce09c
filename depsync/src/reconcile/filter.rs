//! Folder exclusion filter.
//!
//! A folder excludes every file whose relative path contains it as a whole
//! path segment, compared without regard to case. `Android` excludes
//! `SDK/Android/lib.so` but not `SDK/AndroidExtras/lib.so`.

use std::collections::BTreeSet;

/// Case-insensitive set of excluded folder names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderFilter {
    /// Lowercased, `/`-normalized folder names without surrounding slashes.
    excluded: BTreeSet<String>,
}

impl FolderFilter {
    /// A filter that excludes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folders belonging to platforms other than the running one.
    ///
    /// Android and HTML5 binaries are only kept when their SDKs are
    /// configured (`NDKROOT`, `EMSCRIPTEN`).
    pub fn platform_defaults() -> Self {
        let mut filter = Self::new();
        if !cfg!(windows) {
            filter.exclude("Win32");
            filter.exclude("Win64");
        }
        if !cfg!(target_os = "macos") {
            filter.exclude("Mac");
        }
        if std::env::var_os("EMSCRIPTEN").is_none() {
            filter.exclude("HTML5");
        }
        if std::env::var_os("NDKROOT").is_none() {
            filter.exclude("Android");
        }
        filter
    }

    /// Add a folder to the excluded set.
    pub fn exclude(&mut self, folder: &str) {
        let folder = normalize_folder(folder);
        if !folder.is_empty() {
            self.excluded.insert(folder);
        }
    }

    /// Remove a folder from the excluded set.
    pub fn include(&mut self, folder: &str) {
        self.excluded.remove(&normalize_folder(folder));
    }

    /// Builder form of [`exclude`](Self::exclude).
    pub fn with_excluded(mut self, folder: &str) -> Self {
        self.exclude(folder);
        self
    }

    /// Whether nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    /// Excluded folder names, lowercased and sorted.
    pub fn folders(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    /// Whether a relative file path lies inside an excluded folder.
    pub fn is_excluded(&self, name: &str) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let path = format!("/{}", name.replace('\\', "/").to_lowercase());
        self.excluded
            .iter()
            .any(|folder| path.contains(&format!("/{}/", folder)))
    }
}

fn normalize_folder(folder: &str) -> String {
    folder.replace('\\', "/").trim_matches('/').to_lowercase()
}
