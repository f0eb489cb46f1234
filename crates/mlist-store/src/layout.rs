use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of an mlist home.
///
/// ```text
/// <root>/
///   manifests/<sanitized-name>
///   locks/<sanitized-name>.lock
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn index_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        Ok(self.manifests_dir().join(sanitize_name(name)?))
    }

    pub fn lock_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .locks_dir()
            .join(format!("{}.lock", sanitize_name(name)?)))
    }

    pub fn initialize(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.manifests_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }
}

/// File name for an index: `:` becomes `-` and `/` becomes `_`.
///
/// `cnbs/sample-package:hello` maps to `cnbs_sample-package-hello`.
pub fn sanitize_name(name: &str) -> Result<String, StoreError> {
    let mapped: String = name
        .chars()
        .map(|c| match c {
            ':' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    if mapped.is_empty()
        || mapped == "."
        || mapped == ".."
        || mapped.starts_with('.')
        || mapped.contains(['\\', '\0'])
    {
        return Err(StoreError::InvalidName(name.to_owned()));
    }
    Ok(mapped)
}
