//! Concurrent pack fetching.
//!
//! [`PackFetcher`] drains a queue of [`PackJob`]s with a fixed pool of
//! worker threads. Each worker downloads, verifies and extracts one pack at
//! a time (see `worker`). The first error any worker hits is latched and
//! cancels the rest; the queue is not drained further once that happens.
//!
//! ```text
//! FetchPlan ──► queue ──► worker 1 ─┐
//!                    ├──► worker 2 ─┼──► files in place
//!                    └──► worker N ─┘
//!                          │
//!                          └── FetchCounters ──► ProgressReporter
//! ```

mod cache;
mod plan;
mod progress;
mod transport;
mod worker;

pub use cache::{discover_cache_dir, PackCache, CACHE_DIR_NAME};
pub use plan::{BlobJob, FetchPlan, PackJob};
pub use progress::{FetchCounters, ProgressReporter, StatusCallback, StatusSnapshot};
pub use transport::{HttpTransport, PackTransport, ProxySettings, DEFAULT_TIMEOUT_SECS};

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{SyncError, SyncResult};
use crate::fsutil;
use worker::{PackOutcome, PackWorker};

/// Default base URL for packs.
pub const DEFAULT_BASE_URL: &str = "http://cdn.unrealengine.com/dependencies";

/// Default number of worker threads.
pub const DEFAULT_THREADS: usize = 4;

/// Default number of retries per pack after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Totals for a completed fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Packs downloaded over the network.
    pub packs_downloaded: usize,
    /// Packs served from the local cache.
    pub packs_cached: usize,
    /// Files written to their final location.
    pub files_written: usize,
    /// Compressed bytes of the downloaded packs.
    pub bytes_downloaded: u64,
}

impl FetchSummary {
    fn record(&mut self, job: &PackJob, outcome: PackOutcome) {
        if outcome.from_cache {
            self.packs_cached += 1;
        } else {
            self.packs_downloaded += 1;
            self.bytes_downloaded += job.source.pack.compressed_size;
        }
        self.files_written += outcome.files;
    }
}

/// Worker pool that fetches packs and extracts their blobs.
pub struct PackFetcher {
    transport: Arc<dyn PackTransport>,
    cache: Option<PackCache>,
    threads: usize,
    max_retries: u32,
    base_url: String,
    staging_dir: PathBuf,
}

impl PackFetcher {
    /// Create a fetcher with default settings and no cache.
    pub fn new(transport: Arc<dyn PackTransport>) -> Self {
        Self {
            transport,
            cache: None,
            threads: DEFAULT_THREADS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_url: DEFAULT_BASE_URL.to_string(),
            staging_dir: std::env::temp_dir().join("depsync-staging"),
        }
    }

    /// Set the pack cache.
    pub fn with_cache(mut self, cache: Option<PackCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Set the number of worker threads (minimum 1).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Set how many times a failed pack download is retried.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base URL for packs whose manifest declares none.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the directory for decompressed pack staging files.
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Fetch every pack in `plan` and write its files under `root`.
    ///
    /// Returns the first error any worker hit, or [`SyncError::Cancelled`]
    /// if `cancel` fired before the queue was drained.
    pub fn fetch(
        &self,
        root: &Path,
        plan: FetchPlan,
        counters: &FetchCounters,
        cancel: &CancellationToken,
    ) -> SyncResult<FetchSummary> {
        if plan.is_empty() {
            return Ok(FetchSummary::default());
        }
        fsutil::create_dir_all(&self.staging_dir)?;

        let packs = plan.jobs.len();
        let threads = self.threads.min(packs);
        info!(packs, threads, bytes = plan.compressed_bytes(), "Fetching packs");

        let stop = cancel.child_token();
        let queue = Mutex::new(VecDeque::from(plan.jobs));
        let first_error: OnceLock<SyncError> = OnceLock::new();
        let summary = Mutex::new(FetchSummary::default());

        let worker = PackWorker {
            transport: self.transport.as_ref(),
            cache: self.cache.as_ref(),
            counters,
            cancel: &stop,
            root,
            staging_dir: &self.staging_dir,
            base_url: &self.base_url,
            max_retries: self.max_retries,
        };

        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    let Some(job) = queue.lock().pop_front() else {
                        break;
                    };

                    match worker.run(&job) {
                        Ok(outcome) => summary.lock().record(&job, outcome),
                        Err(e) => {
                            if !matches!(e, SyncError::Cancelled) {
                                error!(pack = %job.source.pack.hash, error = %e, "Pack failed");
                            }
                            if first_error.set(e).is_ok() {
                                stop.cancel();
                            }
                            break;
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }
        if !queue.lock().is_empty() {
            return Err(SyncError::Cancelled);
        }

        let summary = summary.into_inner();
        info!(
            downloaded = summary.packs_downloaded,
            cached = summary.packs_cached,
            files = summary.files_written,
            "Fetched packs"
        );
        Ok(summary)
    }
}
