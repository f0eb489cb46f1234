//! Manifest transports for mlist.
//!
//! A [`Transport`] resolves image references to manifest descriptors and
//! publishes index documents. Three implementations are provided: the OCI
//! distribution API over HTTP ([`RegistryTransport`]), the Docker Engine
//! distribution endpoint ([`DaemonTransport`], lookup only), and an in-process
//! registry ([`MemoryTransport`]) for tests and dry runs.

pub mod auth;
pub mod config;
pub mod daemon;
pub mod memory;
pub mod registry;

pub use config::{RegistryConfig, TransportConfig};
pub use daemon::DaemonTransport;
pub use memory::MemoryTransport;
pub use registry::RegistryTransport;

use mlist_schema::{Descriptor, Digest, ImageReference, Index, SchemaError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("{0} does not exist in registry")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("transport config error: {0}")]
    Config(String),
    #[error("operation not supported by the {0} transport")]
    Unsupported(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("integrity failure for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
}

/// Access to a place where manifests live.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a reference to the descriptor of the manifest it names.
    fn fetch(&self, reference: &ImageReference) -> Result<Descriptor, RemoteError>;

    /// Publish `index` under `reference` and return the digest the remote assigned.
    fn push_index(&self, reference: &ImageReference, index: &Index) -> Result<Digest, RemoteError> {
        let _ = (reference, index);
        Err(RemoteError::Unsupported(self.name().to_owned()))
    }

    /// Download a published index document.
    fn fetch_index(&self, reference: &ImageReference) -> Result<Index, RemoteError> {
        let _ = reference;
        Err(RemoteError::Unsupported(self.name().to_owned()))
    }

    /// Delete the manifest `reference` points at.
    fn delete_manifest(&self, reference: &ImageReference) -> Result<Digest, RemoteError> {
        let _ = reference;
        Err(RemoteError::Unsupported(self.name().to_owned()))
    }
}

/// Pick a transport by name: `registry`, `daemon`, or `memory`.
pub fn select_transport(
    name: &str,
    config: &TransportConfig,
) -> Result<Arc<dyn Transport>, RemoteError> {
    match name {
        "registry" => Ok(Arc::new(RegistryTransport::new(config.clone()))),
        "daemon" => Ok(Arc::new(DaemonTransport::from_config(config)?)),
        "memory" => Ok(Arc::new(MemoryTransport::new())),
        other => Err(RemoteError::Config(format!(
            "unknown transport '{other}', expected registry, daemon or memory"
        ))),
    }
}

/// Read a response body the way every HTTP transport here needs it.
pub(crate) fn read_body(resp: ureq::http::Response<ureq::Body>) -> Result<Vec<u8>, RemoteError> {
    use std::io::Read;
    let mut reader = resp.into_body().into_reader();
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|e| RemoteError::Http(e.to_string()))?;
    Ok(body)
}

pub(crate) fn header_str<'a>(
    resp: &'a ureq::http::Response<ureq::Body>,
    name: &str,
) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}
