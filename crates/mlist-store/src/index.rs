use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use mlist_schema::Index;
use std::fs;
use std::io::{ErrorKind, Write};
use tracing::debug;

/// Loads and saves index documents, one file per index name.
#[derive(Debug, Clone)]
pub struct IndexStore {
    layout: StoreLayout,
}

impl IndexStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout
            .index_path(name)
            .is_ok_and(|p| p.is_file())
    }

    pub fn load(&self, name: &str) -> Result<Index, StoreError> {
        let path = self.layout.index_path(name)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::IndexNotFound(name.to_owned()));
            }
            Err(source) => {
                return Err(StoreError::Read {
                    name: name.to_owned(),
                    source,
                })
            }
        };
        let corrupt = |reason: String| StoreError::Corrupt {
            name: name.to_owned(),
            reason,
        };
        let index = Index::from_json(&data, name).map_err(|e| corrupt(e.to_string()))?;
        index.validate().map_err(|e| corrupt(e.to_string()))?;
        debug!("loaded index {name} ({} manifests)", index.manifests.len());
        Ok(index)
    }

    /// Write `index` under its name. The previous file, if any, is replaced
    /// atomically and left untouched on failure.
    pub fn save(&self, index: &Index) -> Result<(), StoreError> {
        index.validate()?;
        let name = index.name.as_str();
        let dest = self.layout.index_path(name)?;
        let content = index.to_json()?;
        let write_err = |source: std::io::Error| StoreError::Write {
            name: name.to_owned(),
            source,
        };

        let dir = self.layout.manifests_dir();
        fs::create_dir_all(&dir).map_err(write_err)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".mlist-")
            .tempfile_in(&dir)
            .map_err(write_err)?;
        tmp.write_all(&content).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&dest).map_err(|e| write_err(e.error))?;
        fsync_dir(&dir).map_err(write_err)?;

        debug!("saved index {name} to {}", dest.display());
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.layout.index_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::IndexNotFound(name.to_owned()));
            }
            Err(source) => {
                return Err(StoreError::Write {
                    name: name.to_owned(),
                    source,
                })
            }
        }
        fsync_dir(&self.layout.manifests_dir()).map_err(|source| StoreError::Write {
            name: name.to_owned(),
            source,
        })?;
        debug!("deleted index {name}");
        Ok(())
    }

    /// File names of all stored indexes, sorted. Temporary files are skipped.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.manifests_dir();
        let read_err = |source| StoreError::Read {
            name: dir.display().to_string(),
            source,
        };
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_err(e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(read_err)?;
            if !entry.file_type().map_err(read_err)?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with('.') {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
