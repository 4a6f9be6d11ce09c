//! In-memory records for target and working manifests.
//!
//! Target manifests are read fresh on every run and describe what a module
//! wants on disk. The working manifest is the only persisted local state and
//! records what this tool believes is on disk.
//!
//! Field names serialize in PascalCase to match the manifest documents:
//!
//! ```json
//! {
//!   "BaseUrl": "http://cdn.example.com/dependencies",
//!   "Files": [{ "Name": "SDK/lib.bin", "Hash": "aaa...", "IsExecutable": false }],
//!   "Blobs": [{ "Hash": "aaa...", "PackHash": "ppp...", "PackOffset": 0, "Size": 1024 }],
//!   "Packs": [{ "Hash": "ppp...", "RemotePath": "deps", "CompressedSize": 512, "UncompressedSize": 1024 }]
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Case-insensitive lookup key for a relative file name.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// A file a module requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetFile {
    /// Path relative to the root, `/`-separated.
    pub name: String,
    /// Digest of the file contents, which is also the hash of its blob.
    pub hash: ContentHash,
    /// Whether the file should get execute permissions.
    #[serde(default)]
    pub is_executable: bool,
}

impl TargetFile {
    /// Create a non-executable target file.
    pub fn new(name: impl Into<String>, hash: impl Into<ContentHash>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            is_executable: false,
        }
    }
}

/// A content-addressed byte range inside a decompressed pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Blob {
    /// Digest of the blob's bytes.
    pub hash: ContentHash,
    /// Pack containing the blob.
    pub pack_hash: ContentHash,
    /// Offset into the decompressed pack stream.
    pub pack_offset: u64,
    /// Decompressed length.
    pub size: u64,
}

/// A compressed archive, the unit of network transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pack {
    /// Digest of the decompressed payload.
    pub hash: ContentHash,
    /// Server-side directory of the pack.
    pub remote_path: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// One target manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TargetManifest {
    /// Base URL for this document's packs; the configured default if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Fetch this document's packs without the configured proxy.
    pub ignore_proxy: bool,
    pub files: Vec<TargetFile>,
    pub blobs: Vec<Blob>,
    pub packs: Vec<Pack>,
}

/// A pack together with where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSource {
    pub pack: Pack,
    /// Base URL from the declaring manifest, if it had one.
    pub base_url: Option<String>,
    pub ignore_proxy: bool,
}

impl PackSource {
    /// URL of the pack: `{base}/{remote_path}/{hash}`.
    pub fn url(&self, default_base_url: &str) -> String {
        let base = self
            .base_url
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(default_base_url);
        format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            self.pack.remote_path.trim_matches('/'),
            self.pack.hash
        )
    }
}

/// Target state aggregated across every module's manifests.
///
/// Later documents overwrite earlier entries sharing a key, so the last
/// module to declare a file name wins.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    /// Required files keyed by lowercased name.
    pub files: HashMap<String, TargetFile>,
    /// Blobs keyed by hash.
    pub blobs: HashMap<ContentHash, Blob>,
    /// Packs keyed by hash.
    pub packs: HashMap<ContentHash, PackSource>,
}

impl TargetSet {
    /// Create an empty target set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one manifest document into the set.
    pub fn merge(&mut self, manifest: TargetManifest) {
        for file in manifest.files {
            self.files.insert(name_key(&file.name), file);
        }
        for blob in manifest.blobs {
            self.blobs.insert(blob.hash.clone(), blob);
        }
        for pack in manifest.packs {
            self.packs.insert(
                pack.hash.clone(),
                PackSource {
                    pack,
                    base_url: manifest.base_url.clone(),
                    ignore_proxy: manifest.ignore_proxy,
                },
            );
        }
    }

    /// Look up a required file by name, ignoring case.
    pub fn file(&self, name: &str) -> Option<&TargetFile> {
        self.files.get(&name_key(name))
    }

    /// Target files sorted by name, for deterministic processing.
    pub fn sorted_files(&self) -> Vec<&TargetFile> {
        let mut files: Vec<&TargetFile> = self.files.values().collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }
}

/// A file this tool has placed, or intends to place, on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkingFile {
    pub name: String,
    /// Last known digest of the file on disk. Absent until first written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    /// Digest the current target state requires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<ContentHash>,
    /// Last write time in nanoseconds since the Unix epoch; 0 if never written.
    #[serde(default)]
    pub timestamp: u64,
}

impl WorkingFile {
    /// A record for a file that is about to be downloaded.
    pub fn pending(name: impl Into<String>, expected_hash: ContentHash) -> Self {
        Self {
            name: name.into(),
            hash: None,
            expected_hash: Some(expected_hash),
            timestamp: 0,
        }
    }

    /// Whether the recorded content differs from what the target requires.
    pub fn is_pending(&self) -> bool {
        self.hash != self.expected_hash
    }

    /// Whether this tool has ever completed writing the file.
    pub fn was_written(&self) -> bool {
        self.timestamp != 0
    }
}

/// The persisted record of what has been synchronized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkingManifest {
    pub files: Vec<WorkingFile>,
}

impl WorkingManifest {
    /// Create an empty manifest, as used on the first run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort records by name so the document diffs cleanly.
    pub fn sort(&mut self) {
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Look up a record by name, ignoring case.
    pub fn file(&self, name: &str) -> Option<&WorkingFile> {
        let key = name_key(name);
        self.files.iter().find(|f| name_key(&f.name) == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(hash: &str) -> Pack {
        Pack {
            hash: ContentHash::new(hash),
            remote_path: "deps".to_string(),
            compressed_size: 10,
            uncompressed_size: 20,
        }
    }

    #[test]
    fn test_target_manifest_parses_pascal_case() {
        let json = r#"{
            "Files": [{ "Name": "SDK/lib.bin", "Hash": "AAAA" }],
            "Blobs": [{ "Hash": "aaaa", "PackHash": "pppp", "PackOffset": 16, "Size": 4 }],
            "Packs": [{ "Hash": "pppp", "RemotePath": "deps", "CompressedSize": 3, "UncompressedSize": 20 }]
        }"#;

        let manifest: TargetManifest = serde_json::from_str(json).unwrap();

        assert_eq!(manifest.files[0].name, "SDK/lib.bin");
        assert_eq!(manifest.files[0].hash.as_str(), "aaaa");
        assert!(!manifest.files[0].is_executable);
        assert_eq!(manifest.blobs[0].pack_offset, 16);
        assert_eq!(manifest.packs[0].uncompressed_size, 20);
        assert!(manifest.base_url.is_none());
        assert!(!manifest.ignore_proxy);
    }

    #[test]
    fn test_merge_last_module_wins() {
        let mut set = TargetSet::new();
        set.merge(TargetManifest {
            files: vec![TargetFile::new("SDK/Lib.bin", "1111")],
            ..Default::default()
        });
        set.merge(TargetManifest {
            files: vec![TargetFile::new("sdk/lib.BIN", "2222")],
            ..Default::default()
        });

        assert_eq!(set.files.len(), 1);
        let file = set.file("SDK/LIB.bin").unwrap();
        assert_eq!(file.hash.as_str(), "2222");
        assert_eq!(file.name, "sdk/lib.BIN");
    }

    #[test]
    fn test_merge_keeps_pack_origin() {
        let mut set = TargetSet::new();
        set.merge(TargetManifest {
            base_url: Some("http://mirror/deps".to_string()),
            ignore_proxy: true,
            packs: vec![pack("pppp")],
            ..Default::default()
        });

        let source = &set.packs[&ContentHash::new("pppp")];
        assert!(source.ignore_proxy);
        assert_eq!(source.url("http://default"), "http://mirror/deps/deps/pppp");
    }

    #[test]
    fn test_pack_url_falls_back_to_default() {
        let source = PackSource {
            pack: pack("ABCD"),
            base_url: None,
            ignore_proxy: false,
        };
        assert_eq!(
            source.url("http://cdn.example.com/dependencies/"),
            "http://cdn.example.com/dependencies/deps/abcd"
        );
    }

    #[test]
    fn test_working_file_pending() {
        let file = WorkingFile::pending("SDK/lib.bin", ContentHash::new("aaaa"));
        assert!(file.is_pending());
        assert!(!file.was_written());

        let done = WorkingFile {
            hash: Some(ContentHash::new("AAAA")),
            timestamp: 42,
            ..file
        };
        assert!(!done.is_pending());
        assert!(done.was_written());
    }

    #[test]
    fn test_working_manifest_omits_absent_hash() {
        let manifest = WorkingManifest {
            files: vec![WorkingFile::pending("a.bin", ContentHash::new("aaaa"))],
        };
        let json = serde_json::to_string(&manifest).unwrap();

        assert!(json.contains("\"ExpectedHash\":\"aaaa\""));
        assert!(!json.contains("\"Hash\""));

        let back: WorkingManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_working_manifest_lookup_ignores_case() {
        let manifest = WorkingManifest {
            files: vec![WorkingFile::pending("SDK/Lib.bin", ContentHash::new("aaaa"))],
        };
        assert!(manifest.file("sdk/lib.bin").is_some());
        assert!(manifest.file("sdk/other.bin").is_none());
    }
}
