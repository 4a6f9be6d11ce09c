//! Terminal output: cargo-style status lines and the rolling fetch status.
//!
//! ```text
//!    Checking dependencies in /work/engine
//!    Updating 45% (12.40 MiB/27.55 MiB, 2.10 MiB/s) 12/40 files
//!     Updated 40 files in 12.31s
//! ```

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use depsync::fetch::StatusSnapshot;
use depsync::sync::SharedStatusCallback;
use depsync::{ChangeReport, SyncReport};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

/// Print a status verb right-aligned to 12 columns, followed by a message.
pub fn print_status(verb: &str, message: &str) {
    print_styled(console::Style::new().green().bold(), verb, message);
}

/// Like [`print_status`], in yellow.
pub fn print_warning(verb: &str, message: &str) {
    print_styled(console::Style::new().yellow().bold(), verb, message);
}

fn print_styled(style: console::Style, verb: &str, message: &str) {
    let mut term = console::Term::stderr();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(verb), message);
}

/// Render a fetch snapshot as a single line.
pub fn format_snapshot(snapshot: &StatusSnapshot) -> String {
    let mut line = format!(
        "{}% ({}/{}, {}/s) {}/{} files",
        snapshot.percent(),
        HumanBytes(snapshot.bytes_read + snapshot.bytes_cached),
        HumanBytes(snapshot.bytes_total),
        HumanBytes(snapshot.bytes_per_second as u64),
        snapshot.files_done,
        snapshot.files_total,
    );
    if snapshot.bytes_cached > 0 {
        line.push_str(&format!(", {} from cache", HumanBytes(snapshot.bytes_cached)));
    }
    line
}

/// Single rewritable status line shown while packs are fetched.
#[derive(Clone)]
pub struct StatusLine {
    bar: ProgressBar,
}

impl StatusLine {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:>10.green.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_prefix("Updating");
        Self { bar }
    }

    /// Callback that feeds the status line from the progress reporter.
    pub fn callback(&self) -> SharedStatusCallback {
        let bar = self.bar.clone();
        let started = Arc::new(std::sync::Once::new());
        Arc::new(move |snapshot: &StatusSnapshot| {
            started.call_once(|| bar.enable_steady_tick(Duration::from_millis(100)));
            bar.set_message(format_snapshot(snapshot));
        })
    }

    /// Remove the line from the terminal.
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Print the add/update/remove lists of a dry run.
pub fn print_changes(changes: &ChangeReport) {
    for name in &changes.added {
        print_status("Add", name);
    }
    for name in &changes.updated {
        print_status("Update", name);
    }
    for name in &changes.removed {
        print_warning("Remove", name);
    }
    if changes.is_empty() {
        print_status("Fresh", "all dependencies are up to date");
    }
}

/// Print the outcome of a run.
pub fn print_summary(report: &SyncReport, started: Instant) {
    if report.dry_run {
        print_changes(&report.changes);
        return;
    }

    for name in &report.tampered {
        print_warning("Modified", &format!("{} (left unchanged)", name));
    }

    let elapsed = started.elapsed();
    let elapsed = if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    };

    let fetch = &report.fetch;
    if fetch.files_written == 0 && report.removed == 0 {
        print_status("Fresh", &format!("0 files to update ({})", elapsed));
        return;
    }

    let mut message = format!("{} files in {}", fetch.files_written, elapsed);
    if fetch.packs_downloaded > 0 {
        message.push_str(&format!(
            ", downloaded {} in {} packs",
            HumanBytes(fetch.bytes_downloaded),
            fetch.packs_downloaded
        ));
    }
    if fetch.packs_cached > 0 {
        message.push_str(&format!(", {} packs from cache", fetch.packs_cached));
    }
    if report.removed > 0 {
        message.push_str(&format!(", removed {}", report.removed));
    }
    print_status("Updated", &message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_snapshot() {
        let snapshot = StatusSnapshot {
            bytes_read: 512,
            bytes_total: 1024,
            bytes_cached: 0,
            files_done: 1,
            files_total: 4,
            bytes_per_second: 256.0,
        };

        let line = format_snapshot(&snapshot);

        assert!(line.starts_with("50% "));
        assert!(line.ends_with("1/4 files"));
    }

    #[test]
    fn test_format_snapshot_mentions_cache() {
        let snapshot = StatusSnapshot {
            bytes_cached: 2048,
            bytes_total: 4096,
            ..Default::default()
        };
        assert!(format_snapshot(&snapshot).contains("from cache"));
    }
}
