//! Delta between the target state and what is on disk.
//!
//! Reconciliation happens in two phases so that a dry run and an
//! interactive overwrite prompt can sit between them:
//!
//! 1. [`Reconciler::plan`] reads the disk but changes nothing. It rehashes
//!    files whose timestamps moved, adopts untracked files that already
//!    exist, and sorts every file into keep, download, stale or tampered.
//! 2. [`ReconcilePlan::commit`] deletes stale files (and tampered ones when
//!    overwriting) and yields the new working manifest and download list.
//!
//! A file is tampered when its content no longer matches the hash this tool
//! recorded for it. Tampered files are never deleted or downloaded over
//! unless the caller asks for it.

mod filter;

pub use filter::FolderFilter;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::fsutil;
use crate::hash::hash_file;
use crate::manifest::{name_key, TargetFile, TargetSet, WorkingFile, WorkingManifest};

/// Computes reconciliation plans for one root directory.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    root: &'a Path,
    filter: &'a FolderFilter,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler for `root`, skipping files the filter excludes.
    pub fn new(root: &'a Path, filter: &'a FolderFilter) -> Self {
        Self { root, filter }
    }

    /// Plan and commit in one step.
    ///
    /// With `force`, tampered files are deleted and downloaded again;
    /// otherwise they are left alone and reported.
    pub fn reconcile(
        &self,
        targets: &TargetSet,
        working: WorkingManifest,
        force: bool,
    ) -> SyncResult<Reconciliation> {
        self.plan(targets, working)?.commit(self.root, force)
    }

    /// Work out what has to change without touching the disk.
    pub fn plan(&self, targets: &TargetSet, working: WorkingManifest) -> SyncResult<ReconcilePlan> {
        let mut current = self.refresh_working(working)?;
        let wanted: Vec<&TargetFile> = targets
            .sorted_files()
            .into_iter()
            .filter(|f| !self.filter.is_excluded(&f.name))
            .collect();

        let adopted = self.adopt_untracked(&wanted, &mut current)?;

        let mut new_files = Vec::with_capacity(wanted.len());
        let mut downloads = Vec::new();

        for target in wanted {
            let key = name_key(&target.name);
            let up_to_date = current
                .get(&key)
                .map(|f| f.hash.as_ref() == Some(&target.hash))
                .unwrap_or(false);

            if up_to_date {
                if let Some(mut file) = current.remove(&key) {
                    file.expected_hash = Some(target.hash.clone());
                    new_files.push(file);
                }
            } else {
                new_files.push(WorkingFile::pending(&target.name, target.hash.clone()));
                downloads.push(target.clone());
            }
        }

        let mut leftovers: Vec<WorkingFile> = current.into_values().collect();
        leftovers.sort_by(|a, b| a.name.cmp(&b.name));
        let (tampered, stale): (Vec<_>, Vec<_>) =
            leftovers.into_iter().partition(WorkingFile::is_pending);

        debug!(
            keep = new_files.len() - downloads.len(),
            download = downloads.len(),
            stale = stale.len(),
            tampered = tampered.len(),
            adopted,
            "Planned reconciliation"
        );

        Ok(ReconcilePlan {
            new_files,
            downloads,
            stale,
            tampered,
            adopted,
        })
    }

    /// Keep records whose files still exist, rehashing any whose timestamp
    /// moved. Records of missing files are dropped.
    fn refresh_working(&self, working: WorkingManifest) -> SyncResult<HashMap<String, WorkingFile>> {
        let mut current = HashMap::with_capacity(working.files.len());

        for mut file in working.files {
            let path = self.root.join(&file.name);
            if !path.is_file() {
                debug!(file = %file.name, "Tracked file is missing");
                continue;
            }

            let timestamp = fsutil::modified_nanos(&path)?;
            if timestamp != file.timestamp {
                debug!(file = %file.name, "Timestamp changed, rehashing");
                file.hash = Some(hash_file(&path)?);
                file.timestamp = timestamp;
            }
            current.insert(name_key(&file.name), file);
        }

        Ok(current)
    }

    /// Track files that already exist on disk under a wanted name but were
    /// never recorded, by hashing them in place.
    fn adopt_untracked(
        &self,
        wanted: &[&TargetFile],
        current: &mut HashMap<String, WorkingFile>,
    ) -> SyncResult<usize> {
        let mut adopted = 0;

        for target in wanted {
            let key = name_key(&target.name);
            if current.contains_key(&key) {
                continue;
            }

            let path = self.root.join(&target.name);
            if path.is_file() {
                debug!(file = %target.name, "Adopting untracked file");
                current.insert(
                    key,
                    WorkingFile {
                        name: target.name.clone(),
                        hash: Some(hash_file(&path)?),
                        expected_hash: None,
                        timestamp: fsutil::modified_nanos(&path)?,
                    },
                );
                adopted += 1;
            }
        }

        Ok(adopted)
    }
}

/// What a reconciliation would do, before anything on disk changes.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    /// Records for every wanted file: kept ones plus pending downloads.
    new_files: Vec<WorkingFile>,
    /// Wanted files that are missing or out of date.
    downloads: Vec<TargetFile>,
    /// Tracked files no longer wanted, or about to be replaced.
    stale: Vec<WorkingFile>,
    /// Tracked files modified since this tool wrote them.
    tampered: Vec<WorkingFile>,
    /// Number of untracked files taken into the working set.
    adopted: usize,
}

impl ReconcilePlan {
    /// Files that need downloading.
    pub fn downloads(&self) -> &[TargetFile] {
        &self.downloads
    }

    /// Files modified locally.
    pub fn tampered(&self) -> &[WorkingFile] {
        &self.tampered
    }

    /// Files that will be deleted.
    pub fn stale(&self) -> &[WorkingFile] {
        &self.stale
    }

    /// Number of untracked files adopted by hashing them in place.
    pub fn adopted(&self) -> usize {
        self.adopted
    }

    /// Whether the tree already matches the target state.
    pub fn is_up_to_date(&self) -> bool {
        self.downloads.is_empty() && self.stale.is_empty() && self.tampered.is_empty()
    }

    /// The add/update/remove view of this plan, as printed by a dry run.
    pub fn report(&self) -> ChangeReport {
        let downloading: HashSet<String> =
            self.downloads.iter().map(|f| name_key(&f.name)).collect();
        let leftover: HashMap<String, &str> = self
            .stale
            .iter()
            .chain(&self.tampered)
            .map(|f| (name_key(&f.name), f.name.as_str()))
            .collect();

        let mut report = ChangeReport::default();
        for (key, name) in &leftover {
            if downloading.contains(key) {
                report.updated.push(name.to_string());
            } else {
                report.removed.push(name.to_string());
            }
        }
        for file in &self.downloads {
            if !leftover.contains_key(&name_key(&file.name)) {
                report.added.push(file.name.clone());
            }
        }

        report.added.sort();
        report.updated.sort();
        report.removed.sort();
        report
    }

    /// Apply the plan to the disk.
    ///
    /// Stale files are deleted. Tampered files are deleted and downloaded
    /// again when `overwrite_tampered` is set; otherwise they keep their
    /// contents and their old record, and are dropped from the downloads.
    pub fn commit(self, root: &Path, overwrite_tampered: bool) -> SyncResult<Reconciliation> {
        let ReconcilePlan {
            mut new_files,
            mut downloads,
            stale,
            tampered,
            ..
        } = self;

        for file in &stale {
            if fsutil::remove_file_if_exists(&root.join(&file.name))? {
                debug!(file = %file.name, "Removed outdated file");
            }
        }

        let mut kept = Vec::new();
        let mut blocked = Vec::new();

        if overwrite_tampered {
            for file in &tampered {
                info!(file = %file.name, "Overwriting modified file");
                fsutil::remove_file_if_exists(&root.join(&file.name))?;
            }
        } else {
            for file in tampered {
                warn!(file = %file.name, "File has been modified, leaving it unchanged");
                let key = name_key(&file.name);

                let before = downloads.len();
                downloads.retain(|d| name_key(&d.name) != key);
                if downloads.len() != before {
                    blocked.push(file.name.clone());
                }

                new_files.retain(|f| name_key(&f.name) != key);
                new_files.push(file.clone());
                kept.push(file);
            }
        }

        let mut working = WorkingManifest { files: new_files };
        working.sort();

        Ok(Reconciliation {
            working,
            downloads,
            tampered: kept,
            blocked,
        })
    }
}

/// Result of a committed reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// The working manifest to persist before downloading.
    pub working: WorkingManifest,
    /// Files to fetch.
    pub downloads: Vec<TargetFile>,
    /// Tampered files that were left unchanged.
    pub tampered: Vec<WorkingFile>,
    /// Names of tampered files whose required update was skipped.
    pub blocked: Vec<String>,
}

/// Files a run would add, update or remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeReport {
    /// Whether the run would change nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::manifest::TargetManifest;
    use std::fs;
    use tempfile::TempDir;

    fn targets(files: &[(&str, &[u8])]) -> TargetSet {
        let mut set = TargetSet::new();
        set.merge(TargetManifest {
            files: files
                .iter()
                .map(|(name, data)| TargetFile::new(*name, ContentHash::of_bytes(data)))
                .collect(),
            ..Default::default()
        });
        set
    }

    /// Write a file and return the record this tool would have made for it.
    fn synced(root: &Path, name: &str, data: &[u8]) -> WorkingFile {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        let hash = ContentHash::of_bytes(data);
        WorkingFile {
            name: name.to_string(),
            hash: Some(hash.clone()),
            expected_hash: Some(hash),
            timestamp: fsutil::modified_nanos(&path).unwrap(),
        }
    }

    fn working(files: Vec<WorkingFile>) -> WorkingManifest {
        WorkingManifest { files }
    }

    #[test]
    fn test_empty_tree_downloads_everything() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let targets = targets(&[("SDK/a.bin", b"a"), ("SDK/b.bin", b"b")]);

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(&targets, WorkingManifest::new())
            .unwrap();

        assert_eq!(plan.downloads().len(), 2);
        assert!(plan.stale().is_empty());
        assert_eq!(plan.report().added, vec!["SDK/a.bin", "SDK/b.bin"]);
    }

    #[test]
    fn test_unchanged_files_are_kept() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let record = synced(temp.path(), "SDK/a.bin", b"a");

        let result = Reconciler::new(temp.path(), &filter)
            .reconcile(&targets(&[("SDK/a.bin", b"a")]), working(vec![record.clone()]), false)
            .unwrap();

        assert!(result.downloads.is_empty());
        assert_eq!(result.working.files, vec![record]);
    }

    #[test]
    fn test_missing_tracked_file_is_downloaded() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let record = synced(temp.path(), "SDK/a.bin", b"a");
        fs::remove_file(temp.path().join("SDK/a.bin")).unwrap();

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(&targets(&[("SDK/a.bin", b"a")]), working(vec![record]))
            .unwrap();

        assert_eq!(plan.downloads().len(), 1);
        assert!(plan.stale().is_empty());
        assert!(plan.tampered().is_empty());
    }

    #[test]
    fn test_updated_target_replaces_file() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let record = synced(temp.path(), "SDK/a.bin", b"old");

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(&targets(&[("SDK/a.bin", b"new")]), working(vec![record]))
            .unwrap();
        assert_eq!(plan.report().updated, vec!["SDK/a.bin"]);

        let result = plan.commit(temp.path(), false).unwrap();

        assert_eq!(result.downloads.len(), 1);
        assert!(!temp.path().join("SDK/a.bin").exists());
        let file = result.working.file("SDK/a.bin").unwrap();
        assert!(file.hash.is_none());
        assert_eq!(file.expected_hash, Some(ContentHash::of_bytes(b"new")));
    }

    #[test]
    fn test_unwanted_file_is_removed() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let record = synced(temp.path(), "SDK/gone.bin", b"gone");

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(&TargetSet::new(), working(vec![record]))
            .unwrap();
        assert_eq!(plan.report().removed, vec!["SDK/gone.bin"]);

        let result = plan.commit(temp.path(), false).unwrap();

        assert!(result.working.files.is_empty());
        assert!(!temp.path().join("SDK/gone.bin").exists());
    }

    #[test]
    fn test_tampered_file_is_preserved() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let mut record = synced(temp.path(), "SDK/a.bin", b"a");
        fs::write(temp.path().join("SDK/a.bin"), b"edited").unwrap();
        record.timestamp -= 1;

        let result = Reconciler::new(temp.path(), &filter)
            .reconcile(&targets(&[("SDK/a.bin", b"a")]), working(vec![record]), false)
            .unwrap();

        assert!(result.downloads.is_empty());
        assert_eq!(result.blocked, vec!["SDK/a.bin"]);
        assert_eq!(fs::read(temp.path().join("SDK/a.bin")).unwrap(), b"edited");

        let kept = result.working.file("SDK/a.bin").unwrap();
        assert_eq!(kept.hash, Some(ContentHash::of_bytes(b"edited")));
        assert_eq!(kept.expected_hash, Some(ContentHash::of_bytes(b"a")));
        assert_eq!(result.working.files.len(), 1);
    }

    #[test]
    fn test_force_overwrites_tampered_file() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let mut record = synced(temp.path(), "SDK/a.bin", b"a");
        fs::write(temp.path().join("SDK/a.bin"), b"edited").unwrap();
        record.timestamp -= 1;

        let result = Reconciler::new(temp.path(), &filter)
            .reconcile(&targets(&[("SDK/a.bin", b"a")]), working(vec![record]), true)
            .unwrap();

        assert_eq!(result.downloads.len(), 1);
        assert!(result.tampered.is_empty());
        assert!(!temp.path().join("SDK/a.bin").exists());
    }

    #[test]
    fn test_untracked_matching_file_is_adopted() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        fs::create_dir_all(temp.path().join("SDK")).unwrap();
        fs::write(temp.path().join("SDK/a.bin"), b"a").unwrap();

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(&targets(&[("SDK/a.bin", b"a")]), WorkingManifest::new())
            .unwrap();

        assert_eq!(plan.adopted(), 1);
        assert!(plan.is_up_to_date());
    }

    #[test]
    fn test_untracked_different_file_is_not_overwritten() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        fs::create_dir_all(temp.path().join("SDK")).unwrap();
        fs::write(temp.path().join("SDK/a.bin"), b"mine").unwrap();

        let result = Reconciler::new(temp.path(), &filter)
            .reconcile(&targets(&[("SDK/a.bin", b"a")]), WorkingManifest::new(), false)
            .unwrap();

        assert!(result.downloads.is_empty());
        assert_eq!(result.tampered.len(), 1);
        assert_eq!(fs::read(temp.path().join("SDK/a.bin")).unwrap(), b"mine");
    }

    #[test]
    fn test_excluded_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new().with_excluded("Android");

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(
                &targets(&[("SDK/Android/lib.so", b"so"), ("SDK/Linux/lib.so", b"so2")]),
                WorkingManifest::new(),
            )
            .unwrap();

        let names: Vec<&str> = plan.downloads().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["SDK/Linux/lib.so"]);
    }

    #[test]
    fn test_excluded_untracked_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new().with_excluded("Android");
        fs::create_dir_all(temp.path().join("SDK/Android")).unwrap();
        fs::write(temp.path().join("SDK/Android/lib.so"), b"local").unwrap();

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(&targets(&[("SDK/Android/lib.so", b"so")]), WorkingManifest::new())
            .unwrap();

        assert!(plan.is_up_to_date());
        assert!(temp.path().join("SDK/Android/lib.so").exists());
    }

    #[test]
    fn test_rehash_after_timestamp_change() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        // A record from an interrupted run: the file landed but was never
        // marked as written.
        fs::write(temp.path().join("a.bin"), b"a").unwrap();
        let record = WorkingFile::pending("a.bin", ContentHash::of_bytes(b"a"));

        let result = Reconciler::new(temp.path(), &filter)
            .reconcile(&targets(&[("a.bin", b"a")]), working(vec![record]), false)
            .unwrap();

        assert!(result.downloads.is_empty());
        let file = result.working.file("a.bin").unwrap();
        assert_eq!(file.hash, Some(ContentHash::of_bytes(b"a")));
        assert!(file.was_written());
    }

    #[test]
    fn test_names_match_without_case() {
        let temp = TempDir::new().unwrap();
        let filter = FolderFilter::new();
        let record = synced(temp.path(), "SDK/a.bin", b"a");

        let plan = Reconciler::new(temp.path(), &filter)
            .plan(&targets(&[("sdk/A.bin", b"a")]), working(vec![record]))
            .unwrap();

        assert!(plan.is_up_to_date());
    }
}
