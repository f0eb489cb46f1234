//! Index builder, mutator, and publisher for mlist.
//!
//! This crate ties the schema, store, and transport layers together into the
//! `IndexManager`: the API for creating image indexes from a set of references,
//! annotating, adding, and removing their manifests, and publishing them to a
//! registry. It also provides cancellation, an advisory per-index lock, and the
//! settings file loader.

pub mod concurrency;
pub mod config;
pub mod manager;

pub use concurrency::{install_signal_handler, CancelToken, IndexLock};
pub use config::{resolve_home, ConfigProvider, Settings, DEFAULT_WORKERS};
pub use manager::{
    CreateOptions, CreateReport, IndexManager, Inspection, InspectionSource, PushOptions,
    PushReport,
};

use mlist_remote::RemoteError;
use mlist_schema::SchemaError;
use mlist_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    InvalidReference(String),
    #[error("{0}")]
    ImageNotFound(String),
    #[error("{0}")]
    MissingPlatformInfo(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    IndexNotFound(String),
    #[error("{0}")]
    ManifestNotInIndex(String),
    #[error("{0}")]
    Corrupt(String),
    #[error("{0}")]
    SaveFailure(String),
    #[error("failed to push index: {0}")]
    PushFailure(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
}

/// The category of a [`CoreError`], without its detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidReference,
    ImageNotFound,
    MissingPlatformInfo,
    UnsupportedMediaType,
    IndexNotFound,
    ManifestNotInIndex,
    Corrupt,
    SaveFailure,
    PushFailure,
    Cancelled,
    Config,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidReference(_) => ErrorKind::InvalidReference,
            CoreError::ImageNotFound(_) => ErrorKind::ImageNotFound,
            CoreError::MissingPlatformInfo(_) => ErrorKind::MissingPlatformInfo,
            CoreError::UnsupportedMediaType(_) => ErrorKind::UnsupportedMediaType,
            CoreError::IndexNotFound(_) => ErrorKind::IndexNotFound,
            CoreError::ManifestNotInIndex(_) => ErrorKind::ManifestNotInIndex,
            CoreError::Corrupt(_) => ErrorKind::Corrupt,
            CoreError::SaveFailure(_) => ErrorKind::SaveFailure,
            CoreError::PushFailure(_) => ErrorKind::PushFailure,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::Config(_) => ErrorKind::Config,
        }
    }

    /// Map a transport error raised while resolving a reference.
    pub(crate) fn from_fetch(reference: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(_) => CoreError::ImageNotFound(err.to_string()),
            RemoteError::Schema(e) => CoreError::from(e),
            RemoteError::Config(msg) => CoreError::Config(msg),
            other => CoreError::ImageNotFound(format!("could not resolve {reference}: {other}")),
        }
    }

    /// Map a transport error raised while publishing or deleting remotely.
    pub(crate) fn from_push(err: &RemoteError) -> Self {
        CoreError::PushFailure(err.to_string())
    }
}

impl From<SchemaError> for CoreError {
    fn from(e: SchemaError) -> Self {
        let msg = e.to_string();
        match e {
            SchemaError::InvalidReference { .. } | SchemaError::InvalidDigest(_) => {
                CoreError::InvalidReference(msg)
            }
            SchemaError::UnsupportedMediaType(_) | SchemaError::MixedMediaType { .. } => {
                CoreError::UnsupportedMediaType(msg)
            }
            SchemaError::MissingPlatform { .. } => CoreError::MissingPlatformInfo(msg),
            SchemaError::ManifestNotInIndex(_) => CoreError::ManifestNotInIndex(msg),
            SchemaError::UnsupportedSchemaVersion(_)
            | SchemaError::InvalidSize(_)
            | SchemaError::Decode(_) => CoreError::Corrupt(msg),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        let msg = e.to_string();
        match e {
            StoreError::IndexNotFound(_) => CoreError::IndexNotFound(msg),
            StoreError::Corrupt { .. } | StoreError::Read { .. } => CoreError::Corrupt(msg),
            StoreError::Write { .. } => CoreError::SaveFailure(msg),
            StoreError::InvalidName(_) => CoreError::InvalidReference(msg),
            StoreError::Schema(inner) => CoreError::from(inner),
        }
    }
}
