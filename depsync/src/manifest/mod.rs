//! Manifest model and persistence.
//!
//! - `model`: target and working manifest records
//! - `store`: discovery and loading of target manifests, crash-safe
//!   persistence of the working manifest

mod model;
mod store;

pub use model::{
    name_key, Blob, Pack, PackSource, TargetFile, TargetManifest, TargetSet, WorkingFile,
    WorkingManifest,
};
pub use store::{
    write_target_manifest, ManifestStore, BUILD_DIR_NAME, TARGET_MANIFEST_EXTENSION,
    TEMP_MANIFEST_SUFFIX, WORKING_MANIFEST_NAME,
};
