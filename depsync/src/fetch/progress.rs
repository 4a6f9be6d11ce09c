//! Progress reporting for pack fetching.
//!
//! Workers bump shared atomic counters as bytes arrive and files land; a
//! dedicated reporter thread polls them at a fixed interval and hands a
//! [`StatusSnapshot`] to a callback for rendering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Number of samples in the download speed window.
const SPEED_WINDOW: usize = 60;

/// Callback invoked by the reporter with each status snapshot.
pub type StatusCallback = Box<dyn Fn(&StatusSnapshot) + Send + Sync>;

/// Shared progress counters for a fetch run.
#[derive(Debug, Default)]
pub struct FetchCounters {
    /// Compressed bytes received over the network.
    bytes_read: AtomicU64,
    /// Compressed bytes the run expects to read.
    bytes_total: AtomicU64,
    /// Compressed bytes served from the local pack cache.
    bytes_cached: AtomicU64,
    files_done: AtomicUsize,
    files_total: AtomicUsize,
    /// Signal to stop the reporter thread.
    done: AtomicBool,
}

impl FetchCounters {
    /// Create counters for a run of `files_total` files in packs totalling
    /// `bytes_total` compressed bytes.
    pub fn new(files_total: usize, bytes_total: u64) -> Self {
        Self {
            bytes_total: AtomicU64::new(bytes_total),
            files_total: AtomicUsize::new(files_total),
            ..Default::default()
        }
    }

    /// Record bytes received from the network.
    pub fn add_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Take back bytes of a failed attempt.
    pub fn rollback_read(&self, bytes: u64) {
        let _ = self
            .bytes_read
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Record bytes served from the cache.
    pub fn add_cached(&self, bytes: u64) {
        self.bytes_cached.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Take back cached bytes of a cache entry that failed verification.
    pub fn rollback_cached(&self, bytes: u64) {
        let _ = self
            .bytes_cached
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Record a file written to its final location.
    pub fn file_done(&self) {
        self.files_done.fetch_add(1, Ordering::SeqCst);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    pub fn bytes_cached(&self) -> u64 {
        self.bytes_cached.load(Ordering::SeqCst)
    }

    pub fn files_done(&self) -> usize {
        self.files_done.load(Ordering::SeqCst)
    }

    /// Signal that fetching is over.
    pub fn signal_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Check if fetching is over.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Current counter values, with no speed estimate.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            bytes_read: self.bytes_read(),
            bytes_total: self.bytes_total.load(Ordering::SeqCst),
            bytes_cached: self.bytes_cached(),
            files_done: self.files_done(),
            files_total: self.files_total.load(Ordering::SeqCst),
            bytes_per_second: 0.0,
        }
    }
}

/// Point-in-time view of fetch progress.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusSnapshot {
    pub bytes_read: u64,
    pub bytes_total: u64,
    pub bytes_cached: u64,
    pub files_done: usize,
    pub files_total: usize,
    /// Network throughput averaged over the recent sample window.
    pub bytes_per_second: f64,
}

impl StatusSnapshot {
    /// Completed share of the run in percent, counting cached bytes as done.
    pub fn percent(&self) -> u32 {
        if self.bytes_total == 0 {
            return if self.files_total == 0 || self.files_done >= self.files_total {
                100
            } else {
                0
            };
        }
        let done = (self.bytes_read + self.bytes_cached).min(self.bytes_total);
        ((done as f64 / self.bytes_total as f64) * 100.0) as u32
    }
}

/// Moving average of download speed over the last few samples.
#[derive(Debug, Default)]
struct SpeedWindow {
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedWindow {
    fn record(&mut self, at: Instant, bytes: u64) -> f64 {
        if self.samples.len() == SPEED_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back((at, bytes));

        match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 => {
                b1.saturating_sub(b0) as f64 / (t1 - t0).as_secs_f64()
            }
            _ => 0.0,
        }
    }
}

/// Background thread that polls [`FetchCounters`] and reports snapshots.
///
/// The reporter makes a final report after the counters are signalled done,
/// and joins its thread when stopped or dropped.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    counters: Arc<FetchCounters>,
}

impl ProgressReporter {
    /// Start a reporter polling every `poll_interval`.
    pub fn start(
        counters: Arc<FetchCounters>,
        callback: StatusCallback,
        poll_interval: Duration,
    ) -> Self {
        let counters_clone = Arc::clone(&counters);

        let handle = thread::spawn(move || {
            let mut window = SpeedWindow::default();
            let report = |window: &mut SpeedWindow| {
                let mut snapshot = counters_clone.snapshot();
                snapshot.bytes_per_second = window.record(Instant::now(), snapshot.bytes_read);
                callback(&snapshot);
            };

            while !counters_clone.is_done() {
                report(&mut window);
                thread::sleep(poll_interval);
            }

            // Final report
            report(&mut window);
        });

        Self {
            handle: Some(handle),
            counters,
        }
    }

    /// Start a reporter with the default 100ms poll interval.
    pub fn start_default(counters: Arc<FetchCounters>, callback: StatusCallback) -> Self {
        Self::start(counters, callback, Duration::from_millis(100))
    }

    /// Stop the reporter and wait for its final report.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.counters.signal_done();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_counters_new() {
        let counters = FetchCounters::new(3, 1000);
        let snapshot = counters.snapshot();

        assert_eq!(snapshot.files_total, 3);
        assert_eq!(snapshot.bytes_total, 1000);
        assert_eq!(snapshot.bytes_read, 0);
        assert!(!counters.is_done());
    }

    #[test]
    fn test_rollback_undoes_failed_attempt() {
        let counters = FetchCounters::new(1, 1000);

        counters.add_read(600);
        counters.rollback_read(600);
        counters.add_read(1000);

        assert_eq!(counters.bytes_read(), 1000);
    }

    #[test]
    fn test_rollback_never_underflows() {
        let counters = FetchCounters::new(1, 10);
        counters.add_read(5);
        counters.rollback_read(50);
        assert_eq!(counters.bytes_read(), 0);
    }

    #[test]
    fn test_percent_counts_cached_bytes() {
        let snapshot = StatusSnapshot {
            bytes_read: 250,
            bytes_cached: 250,
            bytes_total: 1000,
            ..Default::default()
        };
        assert_eq!(snapshot.percent(), 50);
    }

    #[test]
    fn test_percent_with_nothing_to_fetch() {
        assert_eq!(StatusSnapshot::default().percent(), 100);
    }

    #[test]
    fn test_speed_window_average() {
        let mut window = SpeedWindow::default();
        let start = Instant::now();

        assert_eq!(window.record(start, 0), 0.0);
        let speed = window.record(start + Duration::from_secs(2), 1000);

        assert!((speed - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_speed_window_is_bounded() {
        let mut window = SpeedWindow::default();
        let start = Instant::now();
        for i in 0..(SPEED_WINDOW as u64 * 2) {
            window.record(start + Duration::from_secs(i), i * 10);
        }
        assert_eq!(window.samples.len(), SPEED_WINDOW);
    }

    #[test]
    fn test_reporter_lifecycle() {
        let counters = Arc::new(FetchCounters::new(2, 100));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let reporter = ProgressReporter::start(
            Arc::clone(&counters),
            Box::new(move |snapshot| seen_clone.lock().push(snapshot.files_done)),
            Duration::from_millis(10),
        );

        counters.file_done();
        counters.file_done();
        thread::sleep(Duration::from_millis(30));
        reporter.stop();

        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert_eq!(seen.last(), Some(&2));
    }
}
