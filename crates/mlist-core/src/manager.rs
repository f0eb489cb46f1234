use crate::concurrency::{CancelToken, IndexLock};
use crate::config::{ConfigProvider, DEFAULT_WORKERS};
use crate::CoreError;
use mlist_remote::{RemoteError, Transport};
use mlist_schema::{
    Descriptor, Digest, Format, ImageReference, Index, ManifestEntry, PlatformUpdate,
};
use mlist_store::{IndexStore, StoreLayout};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds, edits, and publishes image indexes.
///
/// Every mutation is load, pure transform, save. A failed operation leaves the
/// stored file as it was.
pub struct IndexManager {
    store: IndexStore,
    transport: Arc<dyn Transport>,
    workers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// `docker`, `oci`, or an index media type. Docker when unset.
    pub format: Option<String>,
    /// Push straight to the registry instead of saving locally.
    pub publish: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateReport {
    pub name: String,
    pub index: Index,
    /// Remote digest, when the index was published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Delete the local index after a successful push.
    pub purge: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub name: String,
    pub reference: String,
    pub digest: Digest,
    pub manifests: usize,
    pub purged: bool,
    pub pushed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub name: String,
    pub source: InspectionSource,
    pub index: Index,
}

impl IndexManager {
    pub fn new(root: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store: IndexStore::new(StoreLayout::new(root)),
            transport,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn from_config(config: &dyn ConfigProvider, transport: Arc<dyn Transport>) -> Self {
        Self::new(config.root(), transport).with_workers(config.workers())
    }

    /// Bound on concurrent fetches during [`create_index`](Self::create_index).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Advisory lock for `name`, for callers serializing against other processes.
    /// The name must be a valid index reference; nothing touches disk otherwise.
    pub fn lock(&self, name: &str) -> Result<IndexLock, CoreError> {
        ImageReference::parse(name)?;
        IndexLock::acquire(&self.store.layout().lock_path(name)?)
    }

    /// Assemble an index from `references`, in order, and save or publish it.
    ///
    /// Format and every reference are validated before anything is fetched.
    pub fn create_index<S: AsRef<str>>(
        &self,
        name: &str,
        references: &[S],
        options: &CreateOptions,
        cancel: &CancelToken,
    ) -> Result<CreateReport, CoreError> {
        let format = match options.format.as_deref() {
            Some(f) => f.parse::<Format>()?,
            None => Format::default(),
        };
        let target = ImageReference::parse(name)?;
        mlist_store::sanitize_name(name)?;
        let refs = references
            .iter()
            .map(|r| ImageReference::parse(r.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        info!("creating {format} index {name} from {} references", refs.len());
        let descriptors = self.fetch_all(&refs, cancel)?;

        let mut index = Index::new(name, format);
        for (reference, descriptor) in refs.iter().zip(descriptors) {
            format.check(descriptor.media_type).map_err(|e| {
                CoreError::UnsupportedMediaType(format!("{reference}: {e}"))
            })?;
            index = index.with_entry(ManifestEntry::from(descriptor));
        }

        if options.publish {
            let digest = self.publish(&target, &index, cancel)?;
            info!("published {name} as {digest}");
            return Ok(CreateReport {
                name: name.to_owned(),
                index,
                digest: Some(digest),
            });
        }

        for (reference, entry) in refs.iter().zip(&index.manifests) {
            if !entry.has_complete_platform() {
                return Err(missing_platform(reference, entry));
            }
        }
        self.store.save(&index)?;
        info!("saved index {name} ({} manifests)", index.manifests.len());
        Ok(CreateReport {
            name: name.to_owned(),
            index,
            digest: None,
        })
    }

    /// Overwrite the supplied platform fields of the first entry `reference` resolves to.
    pub fn annotate_manifest(
        &self,
        name: &str,
        reference: &str,
        update: &PlatformUpdate,
        cancel: &CancelToken,
    ) -> Result<Index, CoreError> {
        let reference = ImageReference::parse(reference)?;
        let index = self.store.load(name)?;
        let digest = self.resolve_digest(&reference, cancel)?;

        let updated = index.annotate(&digest, update)?;
        if let Some(entry) = updated.position(&digest).map(|i| &updated.manifests[i]) {
            if !entry.has_complete_platform() {
                return Err(missing_platform(&reference, entry));
            }
        }
        self.store.save(&updated)?;
        debug!("annotated {digest} in {name}");
        Ok(updated)
    }

    /// Append the manifest `reference` names. `overrides` fill in or replace its platform.
    pub fn add_manifest(
        &self,
        name: &str,
        reference: &str,
        overrides: &PlatformUpdate,
        cancel: &CancelToken,
    ) -> Result<Index, CoreError> {
        let reference = ImageReference::parse(reference)?;
        let index = self.store.load(name)?;
        let descriptor = self.fetch_one(&reference, cancel)?;
        index.format().check(descriptor.media_type).map_err(|e| {
            CoreError::UnsupportedMediaType(format!("{reference}: {e}"))
        })?;

        let mut entry = ManifestEntry::from(descriptor);
        if !overrides.is_empty() {
            entry.platform = Some(overrides.apply(entry.platform.take()));
        }
        if !entry.has_complete_platform() {
            return Err(missing_platform(&reference, &entry));
        }
        if index.contains(&entry.digest) {
            warn!("{} is already in {name}; adding a duplicate entry", entry.digest);
        }

        let updated = index.with_entry(entry);
        self.store.save(&updated)?;
        debug!("added {reference} to {name}");
        Ok(updated)
    }

    /// Drop the first entry `reference` resolves to.
    pub fn remove_manifest(
        &self,
        name: &str,
        reference: &str,
        cancel: &CancelToken,
    ) -> Result<Index, CoreError> {
        let reference = ImageReference::parse(reference)?;
        let index = self.store.load(name)?;
        let digest = self.resolve_digest(&reference, cancel)?;
        let updated = index.without(&digest)?;
        self.store.save(&updated)?;
        debug!("removed {digest} from {name}");
        Ok(updated)
    }

    /// Publish the stored index under its name. The local file is kept unless
    /// `purge` is set, and is never touched when the push fails. A purge that
    /// fails after a successful push is logged and reported as `purged: false`.
    pub fn push_index(
        &self,
        name: &str,
        options: PushOptions,
        cancel: &CancelToken,
    ) -> Result<PushReport, CoreError> {
        let index = self.store.load(name)?;
        index.validate()?;
        let target = ImageReference::parse(name)?;

        let digest = self.publish(&target, &index, cancel)?;
        info!("pushed {name} to {target} as {digest}");

        let purged = options.purge
            && match self.store.delete(name) {
                Ok(()) => {
                    debug!("purged local index {name}");
                    true
                }
                Err(e) => {
                    warn!("pushed {name} but could not remove the local copy: {e}");
                    false
                }
            };
        Ok(PushReport {
            name: name.to_owned(),
            reference: target.full_reference(),
            digest,
            manifests: index.manifests.len(),
            purged,
            pushed_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// The local index, or the published one when nothing is stored locally.
    pub fn inspect_index(&self, name: &str, cancel: &CancelToken) -> Result<Inspection, CoreError> {
        if self.store.exists(name) {
            return Ok(Inspection {
                name: name.to_owned(),
                source: InspectionSource::Local,
                index: self.store.load(name)?,
            });
        }

        let reference = ImageReference::parse(name)?;
        cancel.check()?;
        debug!("no local index {name}, asking {} transport", self.transport.name());
        let index = self.transport.fetch_index(&reference).map_err(|e| match e {
            RemoteError::NotFound(_) | RemoteError::Unsupported(_) => CoreError::IndexNotFound(
                format!("index '{name}' exists neither locally nor in the registry: {e}"),
            ),
            RemoteError::Schema(inner) => CoreError::from(inner),
            other => CoreError::from_fetch(name, other),
        })?;
        index.validate().map_err(|e| {
            CoreError::Corrupt(format!("published index '{name}' is invalid: {e}"))
        })?;
        Ok(Inspection {
            name: name.to_owned(),
            source: InspectionSource::Remote,
            index,
        })
    }

    /// File names of every stored index, sorted.
    pub fn list_indexes(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.store.list()?)
    }

    pub fn delete_index(&self, name: &str) -> Result<(), CoreError> {
        self.store.delete(name)?;
        info!("deleted local index {name}");
        Ok(())
    }

    /// Delete the manifest the registry currently serves for `name`.
    pub fn delete_published_index(
        &self,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<Digest, CoreError> {
        let reference = ImageReference::parse(name)?;
        cancel
            .check()
            .map_err(|_| CoreError::PushFailure(format!("delete of {reference} cancelled")))?;
        let digest = self
            .transport
            .delete_manifest(&reference)
            .map_err(|e| match e {
                RemoteError::NotFound(_) => CoreError::IndexNotFound(e.to_string()),
                other => CoreError::from_push(&other),
            })?;
        info!("deleted {reference} ({digest}) from the registry");
        Ok(digest)
    }

    fn publish(
        &self,
        target: &ImageReference,
        index: &Index,
        cancel: &CancelToken,
    ) -> Result<Digest, CoreError> {
        cancel
            .check()
            .map_err(|_| CoreError::PushFailure(format!("push of {target} cancelled")))?;
        debug!(
            "pushing {target} ({} manifests) via {}",
            index.manifests.len(),
            self.transport.name()
        );
        self.transport
            .push_index(target, index)
            .map_err(|e| CoreError::from_push(&e))
    }

    /// Digest-form references match without a lookup; tags are resolved remotely.
    fn resolve_digest(
        &self,
        reference: &ImageReference,
        cancel: &CancelToken,
    ) -> Result<Digest, CoreError> {
        match reference.digest {
            Some(ref digest) => Ok(digest.clone()),
            None => Ok(self.fetch_one(reference, cancel)?.digest),
        }
    }

    fn fetch_one(
        &self,
        reference: &ImageReference,
        cancel: &CancelToken,
    ) -> Result<Descriptor, CoreError> {
        cancel.check()?;
        debug!("resolving {reference}");
        self.transport
            .fetch(reference)
            .map_err(|e| CoreError::from_fetch(&reference.to_string(), e))
    }

    /// Fetch on a pool of at most `workers` threads. Results keep input order;
    /// the first failure in input order wins.
    fn fetch_all(
        &self,
        refs: &[ImageReference],
        cancel: &CancelToken,
    ) -> Result<Vec<Descriptor>, CoreError> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let threads = self.workers.min(refs.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| CoreError::Config(format!("cannot start fetch workers: {e}")))?;
        let results: Vec<Result<Descriptor, CoreError>> = pool.install(|| {
            refs.par_iter()
                .map(|r| self.fetch_one(r, cancel))
                .collect()
        });
        results.into_iter().collect()
    }
}

fn missing_platform(reference: &ImageReference, entry: &ManifestEntry) -> CoreError {
    CoreError::MissingPlatformInfo(format!(
        "{reference} ({}) is missing either OS or Architecture information",
        entry.digest
    ))
}
