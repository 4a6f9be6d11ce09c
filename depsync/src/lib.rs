//! depsync - Binary dependency synchronization
//!
//! Keeps a directory tree in line with the binary files its modules declare
//! in target manifests. Files are content-addressed blobs stored inside
//! compressed packs on a server; only the packs holding missing or outdated
//! files are downloaded, every byte is verified before it lands under its
//! final name, and files modified locally are left alone unless forced.
//!
//! ```no_run
//! use depsync::{SyncConfig, Synchronizer};
//! use tokio_util::sync::CancellationToken;
//!
//! let sync = Synchronizer::new(SyncConfig::new("/work/engine"))?;
//! let report = sync.run(&CancellationToken::new())?;
//! println!("{} files updated", report.fetch.files_written);
//! # Ok::<(), depsync::SyncError>(())
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod hash;
pub mod logging;
pub mod manifest;
pub mod reconcile;
pub mod sync;

pub use config::{CacheLocation, ConfigError, ConfigFile, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use hash::ContentHash;
pub use reconcile::{ChangeReport, FolderFilter};
pub use sync::{OverwriteMode, SyncReport, Synchronizer, TamperResolver};
