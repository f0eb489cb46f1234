use crate::{RemoteError, Transport};
use mlist_schema::{Descriptor, Digest, ImageReference, Index};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Repository {
    tags: HashMap<String, Digest>,
    manifests: HashMap<Digest, Descriptor>,
    documents: HashMap<Digest, Vec<u8>>,
}

impl Repository {
    fn resolve(&self, reference: &ImageReference) -> Option<Digest> {
        match (&reference.digest, &reference.tag) {
            (Some(d), _) => self.manifests.contains_key(d).then(|| d.clone()),
            (None, Some(t)) => self.tags.get(t).cloned(),
            (None, None) => None,
        }
    }
}

/// An in-process registry keyed by `registry/repository`.
///
/// Counts fetches and pushes, and can be told to fail pushes, so callers can
/// observe exactly what reached the "network".
#[derive(Debug, Default)]
pub struct MemoryTransport {
    repos: Mutex<HashMap<String, Repository>>,
    fetches: AtomicUsize,
    pushes: AtomicUsize,
    fail_pushes: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn repos(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Repository>>, RemoteError> {
        self.repos
            .lock()
            .map_err(|_| RemoteError::Http("memory registry lock poisoned".to_owned()))
    }

    /// Register a manifest under `reference` (tag form, digest form, or both).
    pub fn add_image(&self, reference: &str, descriptor: Descriptor) -> Result<(), RemoteError> {
        let reference = ImageReference::parse(reference)?;
        if let Some(ref pinned) = reference.digest {
            if *pinned != descriptor.digest {
                return Err(RemoteError::IntegrityFailure {
                    key: reference.full_reference(),
                    expected: pinned.to_string(),
                    actual: descriptor.digest.to_string(),
                });
            }
        }
        let mut repos = self.repos()?;
        let repo = repos.entry(reference.repository_reference()).or_default();
        if let Some(tag) = reference.tag {
            repo.tags.insert(tag, descriptor.digest.clone());
        }
        repo.manifests.insert(descriptor.digest.clone(), descriptor);
        Ok(())
    }

    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, reference: &ImageReference) -> Result<Descriptor, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let repos = self.repos()?;
        repos
            .get(&reference.repository_reference())
            .and_then(|repo| {
                let digest = repo.resolve(reference)?;
                repo.manifests.get(&digest).cloned()
            })
            .ok_or_else(|| RemoteError::NotFound(reference.full_reference()))
    }

    fn push_index(&self, reference: &ImageReference, index: &Index) -> Result<Digest, RemoteError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(RemoteError::Http(format!(
                "connection reset while pushing {reference}"
            )));
        }
        let body = index.to_json()?;
        let digest = Digest::of(&body);

        let mut repos = self.repos()?;
        let repo = repos.entry(reference.repository_reference()).or_default();
        if let Some(missing) = index
            .manifests
            .iter()
            .find(|m| !repo.manifests.contains_key(&m.digest))
        {
            return Err(RemoteError::NotFound(format!(
                "manifest {} in {}",
                missing.digest,
                reference.repository_reference()
            )));
        }

        repo.manifests.insert(
            digest.clone(),
            Descriptor {
                media_type: index.media_type,
                digest: digest.clone(),
                size: body.len() as u64,
                platform: None,
            },
        );
        repo.documents.insert(digest.clone(), body);
        if let Some(ref tag) = reference.tag {
            repo.tags.insert(tag.clone(), digest.clone());
        }
        Ok(digest)
    }

    fn fetch_index(&self, reference: &ImageReference) -> Result<Index, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let repos = self.repos()?;
        let body = repos
            .get(&reference.repository_reference())
            .and_then(|repo| repo.documents.get(&repo.resolve(reference)?))
            .ok_or_else(|| RemoteError::NotFound(reference.full_reference()))?;
        Ok(Index::from_json(body, &reference.to_string())?)
    }

    fn delete_manifest(&self, reference: &ImageReference) -> Result<Digest, RemoteError> {
        let mut repos = self.repos()?;
        let repo = repos
            .get_mut(&reference.repository_reference())
            .ok_or_else(|| RemoteError::NotFound(reference.full_reference()))?;
        let digest = repo
            .resolve(reference)
            .ok_or_else(|| RemoteError::NotFound(reference.full_reference()))?;
        repo.manifests.remove(&digest);
        repo.documents.remove(&digest);
        repo.tags.retain(|_, d| *d != digest);
        Ok(digest)
    }
}
