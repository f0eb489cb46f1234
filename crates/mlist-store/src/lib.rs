//! Local persistence for image indexes.
//!
//! `StoreLayout` maps index names to files under `<root>/manifests/`, and
//! `IndexStore` loads, saves, lists, and deletes index documents. Every save is
//! atomic: content goes to a temporary file in the target directory, is synced,
//! renamed into place, and the directory is synced.

pub mod index;
pub mod layout;

pub use index::IndexStore;
pub use layout::{sanitize_name, StoreLayout};

use mlist_schema::SchemaError;
use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index '{0}' does not exist in the local storage")]
    IndexNotFound(String),
    #[error("index '{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
    #[error("failed to read index '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("index '{name}' could not be saved in the local storage: {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid index name '{0}'")]
    InvalidName(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
