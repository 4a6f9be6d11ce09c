//! Top-level synchronization run.
//!
//! A run goes through these phases, in order:
//!
//! 1. Recover an interrupted manifest save and load the working manifest.
//! 2. Remove `.incoming` leftovers of downloads that never completed.
//! 3. Load the target manifests and plan the reconciliation.
//! 4. Decide what to do about tampered files, then commit the plan:
//!    stale files are deleted and the intended state is checkpointed.
//! 5. Fetch the packs and write the missing files.
//! 6. Record the downloaded files as written and save the final manifest.
//! 7. Give execute permission to executable files.
//!
//! A dry run stops after phase 3 and only reports. A failed or cancelled
//! fetch leaves the checkpoint from phase 4 as the working manifest; the
//! next run rehashes whatever was written and picks up from there.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CacheLocation, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::fetch::{
    discover_cache_dir, FetchCounters, FetchPlan, FetchSummary, HttpTransport, PackCache,
    PackFetcher, PackTransport, ProgressReporter, StatusSnapshot,
};
use crate::fsutil;
use crate::manifest::{
    name_key, ManifestStore, TargetFile, TargetSet, WorkingFile, WorkingManifest,
};
use crate::reconcile::{ChangeReport, Reconciler, Reconciliation};

/// How files modified since they were last synchronized are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwriteMode {
    /// Leave them alone and report them.
    #[default]
    Unchanged,
    /// Ask a [`TamperResolver`].
    Prompt,
    /// Delete them and download the expected contents.
    Force,
}

/// Decides whether tampered files may be overwritten.
pub trait TamperResolver {
    /// Called at most once per run with every tampered file. Returns `true`
    /// to overwrite all of them.
    fn resolve(&self, tampered: &[WorkingFile]) -> bool;
}

/// Status callback shared with the progress reporter thread.
pub type SharedStatusCallback = Arc<dyn Fn(&StatusSnapshot) + Send + Sync>;

/// Outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Planned additions, updates and removals.
    pub changes: ChangeReport,
    /// Whether this was a dry run that changed nothing.
    pub dry_run: bool,
    /// Outdated files deleted, including ones about to be replaced.
    pub removed: usize,
    /// Untracked files taken over without downloading.
    pub adopted: usize,
    /// Leftover `.incoming` files cleaned up.
    pub cleaned_incoming: usize,
    /// Modified files that were left unchanged.
    pub tampered: Vec<String>,
    /// Modified files whose required update was skipped.
    pub blocked: Vec<String>,
    pub fetch: FetchSummary,
    /// Files that gained execute permission.
    pub executables: usize,
}

impl SyncReport {
    /// Whether tampered files kept required updates from happening.
    pub fn is_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }
}

/// Runs synchronization for one root directory.
pub struct Synchronizer {
    config: SyncConfig,
    store: ManifestStore,
    fetcher: PackFetcher,
    resolver: Option<Box<dyn TamperResolver>>,
    status: Option<SharedStatusCallback>,
}

impl Synchronizer {
    /// Create a synchronizer that fetches packs over HTTP.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        let transport = HttpTransport::with_options(config.timeout, config.proxy.as_ref())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a synchronizer with a custom pack transport.
    pub fn with_transport(config: SyncConfig, transport: Arc<dyn PackTransport>) -> Self {
        let cache = match &config.cache {
            CacheLocation::Disabled => None,
            CacheLocation::Discover => discover_cache_dir(&config.root_dir).map(PackCache::new),
            CacheLocation::At(dir) => Some(PackCache::new(dir)),
        };
        if let Some(cache) = &cache {
            debug!(dir = %cache.dir().display(), "Using pack cache");
        }

        let fetcher = PackFetcher::new(transport)
            .with_cache(cache)
            .with_threads(config.threads)
            .with_max_retries(config.max_retries)
            .with_base_url(config.base_url.clone())
            .with_staging_dir(config.staging_dir.clone());

        Self {
            store: ManifestStore::new(config.root_dir.clone()),
            config,
            fetcher,
            resolver: None,
            status: None,
        }
    }

    /// Set the collaborator asked about tampered files in
    /// [`OverwriteMode::Prompt`].
    pub fn with_resolver(mut self, resolver: Box<dyn TamperResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set a callback receiving fetch progress every 100ms.
    pub fn with_status(mut self, status: SharedStatusCallback) -> Self {
        self.status = Some(status);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bring the root directory in line with its target manifests.
    pub fn run(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let root = self.config.root_dir.as_path();
        let dry_run = self.config.dry_run;
        let mut report = SyncReport {
            dry_run,
            ..Default::default()
        };

        if !dry_run {
            self.store.recover_interrupted_save()?;
        }
        let working = self.store.load_working();
        if !dry_run {
            report.cleaned_incoming = self.store.remove_stale_incoming(&working)?;
        }

        let targets = self.store.load_targets()?;
        info!(root = %root.display(), "Checking dependencies");
        let plan = Reconciler::new(root, &self.config.filter).plan(&targets, working)?;

        // Fail on dangling blob or pack references before touching anything.
        FetchPlan::build(plan.downloads(), &targets)?;

        report.changes = plan.report();
        report.adopted = plan.adopted();
        if dry_run {
            info!(
                add = report.changes.added.len(),
                update = report.changes.updated.len(),
                remove = report.changes.removed.len(),
                "Dry run, nothing changed"
            );
            return Ok(report);
        }

        let overwrite = self.should_overwrite(plan.tampered());
        report.removed = plan.stale().len();
        let Reconciliation {
            mut working,
            downloads,
            tampered,
            blocked,
        } = plan.commit(root, overwrite)?;
        report.tampered = tampered.into_iter().map(|f| f.name).collect();
        report.blocked = blocked;

        self.store.save_working(&working)?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let fetch_plan = FetchPlan::build(&downloads, &targets)?;
        info!(files = fetch_plan.file_count(), packs = fetch_plan.jobs.len(), "Updating dependencies");
        report.fetch = self.fetch(root, fetch_plan, cancel)?;

        mark_downloaded(root, &mut working, &downloads)?;
        self.store.save_working(&working)?;

        report.executables = set_executables(root, &targets, &self.config)?;

        if report.is_blocked() {
            warn!(
                files = report.blocked.len(),
                "Modified files were not updated; rerun with --force to overwrite them"
            );
        }
        Ok(report)
    }

    fn should_overwrite(&self, tampered: &[WorkingFile]) -> bool {
        match self.config.overwrite {
            OverwriteMode::Unchanged => false,
            OverwriteMode::Force => true,
            OverwriteMode::Prompt => {
                !tampered.is_empty()
                    && self
                        .resolver
                        .as_ref()
                        .map(|resolver| resolver.resolve(tampered))
                        .unwrap_or(false)
            }
        }
    }

    fn fetch(
        &self,
        root: &Path,
        plan: FetchPlan,
        cancel: &CancellationToken,
    ) -> SyncResult<FetchSummary> {
        let counters = Arc::new(FetchCounters::new(plan.file_count(), plan.compressed_bytes()));

        let _reporter = self.status.as_ref().map(|status| {
            let status = Arc::clone(status);
            ProgressReporter::start_default(
                Arc::clone(&counters),
                Box::new(move |snapshot: &StatusSnapshot| status(snapshot)),
            )
        });

        self.fetcher.fetch(root, plan, &counters, cancel)
    }
}

/// Record downloaded files as holding their expected contents.
fn mark_downloaded(
    root: &Path,
    working: &mut WorkingManifest,
    downloads: &[TargetFile],
) -> SyncResult<()> {
    let downloaded: HashSet<String> = downloads.iter().map(|f| name_key(&f.name)).collect();

    for file in &mut working.files {
        if downloaded.contains(&name_key(&file.name)) {
            file.hash = file.expected_hash.clone();
            file.timestamp = fsutil::modified_nanos(&root.join(&file.name))?;
        }
    }
    Ok(())
}

/// Set execute bits on every wanted executable file that exists.
fn set_executables(
    root: &Path,
    targets: &TargetSet,
    config: &SyncConfig,
) -> SyncResult<usize> {
    let mut changed = 0;
    for file in targets.sorted_files() {
        if !file.is_executable || config.filter.is_excluded(&file.name) {
            continue;
        }
        let path = root.join(&file.name);
        if path.is_file() && fsutil::set_executable(&path)? {
            debug!(file = %file.name, "Set executable permission");
            changed += 1;
        }
    }
    Ok(changed)
}
