use crate::media::{Format, MediaType};
use crate::types::Digest;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The only schema version an index document may carry.
pub const SCHEMA_VERSION: u32 = 2;

/// Target platform of a single manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str) -> Self {
        Self {
            architecture: architecture.to_owned(),
            os: os.to_owned(),
            variant: None,
            os_version: None,
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: &str) -> Self {
        self.variant = Some(variant.to_owned());
        self
    }

    /// Both operating system and architecture are known.
    pub fn is_complete(&self) -> bool {
        !self.os.is_empty() && !self.architecture.is_empty()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref v) = self.variant {
            write!(f, "/{v}")?;
        }
        Ok(())
    }
}

/// A partial platform edit. `None` and empty strings leave a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformUpdate {
    pub architecture: Option<String>,
    pub os: Option<String>,
    pub variant: Option<String>,
    pub os_version: Option<String>,
}

impl PlatformUpdate {
    pub fn is_empty(&self) -> bool {
        [
            &self.architecture,
            &self.os,
            &self.variant,
            &self.os_version,
        ]
        .iter()
        .all(|f| supplied(f).is_none())
    }

    /// Overlay the supplied fields onto `base`, creating a platform if needed.
    pub fn apply(&self, base: Option<Platform>) -> Platform {
        let mut platform = base.unwrap_or_default();
        if let Some(arch) = supplied(&self.architecture) {
            platform.architecture = arch.to_owned();
        }
        if let Some(os) = supplied(&self.os) {
            platform.os = os.to_owned();
        }
        if let Some(variant) = supplied(&self.variant) {
            platform.variant = Some(variant.to_owned());
        }
        if let Some(os_version) = supplied(&self.os_version) {
            platform.os_version = Some(os_version.to_owned());
        }
        platform
    }
}

fn supplied(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// What a fetcher learns about a manifest reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub media_type: MediaType,
    pub digest: Digest,
    pub size: u64,
    pub platform: Option<Platform>,
}

/// One manifest in an index, identified by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub media_type: MediaType,
    pub size: u64,
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl ManifestEntry {
    pub fn has_complete_platform(&self) -> bool {
        self.platform.as_ref().is_some_and(Platform::is_complete)
    }

    pub fn require_platform(&self) -> Result<(), SchemaError> {
        if self.has_complete_platform() {
            Ok(())
        } else {
            Err(SchemaError::MissingPlatform {
                digest: self.digest.to_string(),
            })
        }
    }
}

impl From<Descriptor> for ManifestEntry {
    fn from(d: Descriptor) -> Self {
        Self {
            media_type: d.media_type,
            size: d.size,
            digest: d.digest,
            platform: d.platform,
        }
    }
}

/// A manifest list (Docker) or image index (OCI).
///
/// `name` is the repository reference the index represents. It is not part of
/// the persisted document; the store restores it from the file it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: MediaType,
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub manifests: Vec<ManifestEntry>,
}

impl Index {
    pub fn new(name: &str, format: Format) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: format.index_media_type(),
            name: name.to_owned(),
            manifests: Vec::new(),
        }
    }

    pub fn format(&self) -> Format {
        self.media_type.format()
    }

    /// Check schema version, media type families, digests and sizes.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(SchemaError::UnsupportedSchemaVersion(self.schema_version));
        }
        if !self.media_type.is_index() {
            return Err(SchemaError::UnsupportedMediaType(format!(
                "{} is not an index media type",
                self.media_type
            )));
        }
        let format = self.format();
        for entry in &self.manifests {
            format.check(entry.media_type)?;
            if !entry.digest.is_valid() {
                return Err(SchemaError::InvalidDigest(entry.digest.to_string()));
            }
            if entry.size == 0 {
                return Err(SchemaError::InvalidSize(entry.digest.to_string()));
            }
        }
        Ok(())
    }

    /// Every entry carries os and architecture. Required before a local save.
    pub fn require_platforms(&self) -> Result<(), SchemaError> {
        self.manifests
            .iter()
            .try_for_each(ManifestEntry::require_platform)
    }

    /// Position of the first entry with the given digest.
    pub fn position(&self, digest: &Digest) -> Option<usize> {
        self.manifests.iter().position(|m| m.digest == *digest)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.position(digest).is_some()
    }

    /// Append an entry. Duplicates are kept.
    #[must_use]
    pub fn with_entry(mut self, entry: ManifestEntry) -> Self {
        self.manifests.push(entry);
        self
    }

    /// Overwrite the supplied platform fields of the first entry matching `digest`.
    pub fn annotate(mut self, digest: &Digest, update: &PlatformUpdate) -> Result<Self, SchemaError> {
        let pos = self
            .position(digest)
            .ok_or_else(|| SchemaError::ManifestNotInIndex(digest.to_string()))?;
        let entry = &mut self.manifests[pos];
        if !update.is_empty() {
            entry.platform = Some(update.apply(entry.platform.take()));
        }
        Ok(self)
    }

    /// Drop the first entry matching `digest`.
    pub fn without(mut self, digest: &Digest) -> Result<Self, SchemaError> {
        let pos = self
            .position(digest)
            .ok_or_else(|| SchemaError::ManifestNotInIndex(digest.to_string()))?;
        self.manifests.remove(pos);
        Ok(self)
    }

    /// Decode a persisted document. The name is supplied by the caller.
    pub fn from_json(data: &[u8], name: &str) -> Result<Self, SchemaError> {
        let mut index: Index = serde_json::from_slice(data)?;
        index.name = name.to_owned();
        Ok(index)
    }

    /// Encode as pretty JSON with four-space indentation and a trailing newline.
    pub fn to_json(&self) -> Result<Vec<u8>, SchemaError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Digest of the encoded document, as a registry would compute it.
    pub fn digest(&self) -> Result<Digest, SchemaError> {
        Ok(Digest::of(&self.to_json()?))
    }
}
