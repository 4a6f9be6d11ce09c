//! Minimal set of packs covering the files to download.

use std::collections::HashMap;

use crate::error::{SyncError, SyncResult};
use crate::hash::ContentHash;
use crate::manifest::{Blob, PackSource, TargetFile, TargetSet};

/// One blob to extract, with every file that needs its bytes.
#[derive(Debug, Clone)]
pub struct BlobJob {
    pub blob: Blob,
    pub files: Vec<TargetFile>,
}

/// One pack to fetch and the blobs to take out of it.
#[derive(Debug, Clone)]
pub struct PackJob {
    pub source: PackSource,
    /// Needed blobs, ordered by offset in the decompressed pack.
    pub blobs: Vec<BlobJob>,
}

impl PackJob {
    /// Number of destination files this pack produces.
    pub fn file_count(&self) -> usize {
        self.blobs.iter().map(|b| b.files.len()).sum()
    }
}

/// Packs to fetch for a set of downloads.
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
    pub jobs: Vec<PackJob>,
}

impl FetchPlan {
    /// Group `downloads` by blob and blobs by pack.
    ///
    /// Only packs that hold at least one needed blob are included, and each
    /// pack appears once however many files it serves. Fails when a file
    /// names a blob, or a blob names a pack, that no manifest declares.
    pub fn build(downloads: &[TargetFile], targets: &TargetSet) -> SyncResult<Self> {
        let mut files_by_blob: HashMap<&ContentHash, Vec<TargetFile>> = HashMap::new();
        for file in downloads {
            if !targets.blobs.contains_key(&file.hash) {
                return Err(SyncError::MissingBlob {
                    file: file.name.clone(),
                    hash: file.hash.to_string(),
                });
            }
            files_by_blob.entry(&file.hash).or_default().push(file.clone());
        }

        let mut blobs_by_pack: HashMap<&ContentHash, Vec<BlobJob>> = HashMap::new();
        for (hash, files) in files_by_blob {
            let blob = &targets.blobs[hash];
            if !targets.packs.contains_key(&blob.pack_hash) {
                return Err(SyncError::MissingPack {
                    blob: blob.hash.to_string(),
                    hash: blob.pack_hash.to_string(),
                });
            }
            blobs_by_pack.entry(&blob.pack_hash).or_default().push(BlobJob {
                blob: blob.clone(),
                files,
            });
        }

        let mut jobs: Vec<PackJob> = blobs_by_pack
            .into_iter()
            .map(|(hash, mut blobs)| {
                blobs.sort_by_key(|b| b.blob.pack_offset);
                for job in &mut blobs {
                    job.files.sort_by(|a, b| a.name.cmp(&b.name));
                }
                PackJob {
                    source: targets.packs[hash].clone(),
                    blobs,
                }
            })
            .collect();

        // Largest first, so a big pack does not start last.
        jobs.sort_by(|a, b| {
            b.source
                .pack
                .compressed_size
                .cmp(&a.source.pack.compressed_size)
                .then_with(|| a.source.pack.hash.cmp(&b.source.pack.hash))
        });

        Ok(Self { jobs })
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of destination files across all packs.
    pub fn file_count(&self) -> usize {
        self.jobs.iter().map(PackJob::file_count).sum()
    }

    /// Total compressed size of all packs.
    pub fn compressed_bytes(&self) -> u64 {
        self.jobs.iter().map(|j| j.source.pack.compressed_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Pack, TargetManifest};

    fn h(s: &str) -> ContentHash {
        ContentHash::of_bytes(s.as_bytes())
    }

    fn blob(name: &str, pack: &str, offset: u64) -> Blob {
        Blob {
            hash: h(name),
            pack_hash: h(pack),
            pack_offset: offset,
            size: 1,
        }
    }

    fn pack(name: &str, size: u64) -> Pack {
        Pack {
            hash: h(name),
            remote_path: "deps".to_string(),
            compressed_size: size,
            uncompressed_size: size,
        }
    }

    fn targets() -> TargetSet {
        let mut set = TargetSet::new();
        set.merge(TargetManifest {
            files: vec![
                TargetFile::new("a.bin", h("a")),
                TargetFile::new("b.bin", h("b")),
                TargetFile::new("copy-of-a.bin", h("a")),
                TargetFile::new("c.bin", h("c")),
            ],
            blobs: vec![blob("a", "p1", 10), blob("b", "p1", 0), blob("c", "p2", 0)],
            packs: vec![pack("p1", 100), pack("p2", 500), pack("unused", 900)],
            ..Default::default()
        });
        set
    }

    #[test]
    fn test_only_needed_packs_are_fetched() {
        let targets = targets();
        let downloads = vec![targets.file("a.bin").unwrap().clone()];

        let plan = FetchPlan::build(&downloads, &targets).unwrap();

        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].source.pack.hash, h("p1"));
        assert_eq!(plan.jobs[0].blobs.len(), 1);
        assert_eq!(plan.compressed_bytes(), 100);
    }

    #[test]
    fn test_blobs_sorted_by_offset_and_shared() {
        let targets = targets();
        let downloads: Vec<TargetFile> = targets.sorted_files().into_iter().cloned().collect();

        let plan = FetchPlan::build(&downloads, &targets).unwrap();

        assert_eq!(plan.jobs.len(), 2);
        assert_eq!(plan.file_count(), 4);
        assert_eq!(plan.jobs[0].source.pack.hash, h("p2"));

        let p1 = &plan.jobs[1];
        let offsets: Vec<u64> = p1.blobs.iter().map(|b| b.blob.pack_offset).collect();
        assert_eq!(offsets, vec![0, 10]);
        assert_eq!(p1.blobs[1].files.len(), 2);
    }

    #[test]
    fn test_missing_blob_is_an_error() {
        let targets = targets();
        let downloads = vec![TargetFile::new("x.bin", h("x"))];

        let err = FetchPlan::build(&downloads, &targets).unwrap_err();
        assert!(matches!(err, SyncError::MissingBlob { .. }));
    }

    #[test]
    fn test_missing_pack_is_an_error() {
        let mut targets = targets();
        targets.blobs.insert(h("d"), blob("d", "nowhere", 0));
        let downloads = vec![TargetFile::new("d.bin", h("d"))];

        let err = FetchPlan::build(&downloads, &targets).unwrap_err();
        assert!(matches!(err, SyncError::MissingPack { .. }));
    }
}
