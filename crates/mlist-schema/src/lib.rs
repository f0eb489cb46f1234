//! Image index model, media types, digests, and reference parsing for mlist.
//!
//! This crate defines the schema layer: the persisted `Index` document and its
//! `ManifestEntry` / `Platform` records, the Docker and OCI media type families
//! (`MediaType`, `Format`), validated content digests (`Digest`), and the
//! local-only image reference resolver (`ImageReference`). Nothing here touches
//! the network or the filesystem.

pub mod index;
pub mod media;
pub mod reference;
pub mod types;

pub use index::{Descriptor, Index, ManifestEntry, Platform, PlatformUpdate, SCHEMA_VERSION};
pub use media::{Format, MediaType, INDEX_ACCEPT, MANIFEST_ACCEPT};
pub use reference::{ImageReference, DEFAULT_REGISTRY, DEFAULT_TAG};
pub use types::Digest;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("'{reference}' is not a valid manifest reference: {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("invalid digest '{0}', expected sha256:<64 lowercase hex>")]
    InvalidDigest(String),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("media type {entry} cannot be stored in a {format} index")]
    MixedMediaType { entry: String, format: String },
    #[error("manifest {digest} is missing either OS or Architecture information")]
    MissingPlatform { digest: String },
    #[error("manifest {0} is not in the index")]
    ManifestNotInIndex(String),
    #[error("unsupported schemaVersion {0}, expected 2")]
    UnsupportedSchemaVersion(u32),
    #[error("manifest {0} has an invalid size of 0 bytes")]
    InvalidSize(String),
    #[error("failed to decode index: {0}")]
    Decode(#[from] serde_json::Error),
}
