use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `Accept` header for manifest lookups: every type an index may reference.
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json";

/// `Accept` header when only an index document is acceptable.
pub const INDEX_ACCEPT: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json";

/// Manifest content types an index or one of its entries may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "application/vnd.docker.distribution.manifest.list.v2+json")]
    DockerManifestList,
    #[serde(rename = "application/vnd.docker.distribution.manifest.v2+json")]
    DockerManifest,
    #[serde(rename = "application/vnd.oci.image.index.v1+json")]
    OciImageIndex,
    #[serde(rename = "application/vnd.oci.image.manifest.v1+json")]
    OciImageManifest,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::DockerManifestList,
        MediaType::DockerManifest,
        MediaType::OciImageIndex,
        MediaType::OciImageManifest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::DockerManifestList => {
                "application/vnd.docker.distribution.manifest.list.v2+json"
            }
            MediaType::DockerManifest => "application/vnd.docker.distribution.manifest.v2+json",
            MediaType::OciImageIndex => "application/vnd.oci.image.index.v1+json",
            MediaType::OciImageManifest => "application/vnd.oci.image.manifest.v1+json",
        }
    }

    /// Parse a `Content-Type` style value; parameters after `;` are ignored.
    pub fn parse(value: &str) -> Result<Self, SchemaError> {
        let bare = value.split(';').next().unwrap_or_default().trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == bare)
            .ok_or_else(|| SchemaError::UnsupportedMediaType(value.to_owned()))
    }

    pub fn format(self) -> Format {
        match self {
            MediaType::DockerManifestList | MediaType::DockerManifest => Format::Docker,
            MediaType::OciImageIndex | MediaType::OciImageManifest => Format::Oci,
        }
    }

    /// Whether this type is a list of manifests rather than a single image.
    pub fn is_index(self) -> bool {
        matches!(self, MediaType::DockerManifestList | MediaType::OciImageIndex)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Media type family of an index. Fixed at creation; never mixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Docker,
    Oci,
}

impl Format {
    pub fn index_media_type(self) -> MediaType {
        match self {
            Format::Docker => MediaType::DockerManifestList,
            Format::Oci => MediaType::OciImageIndex,
        }
    }

    /// Whether an entry of the given type may be stored in an index of this family.
    pub fn accepts(self, media_type: MediaType) -> bool {
        media_type.format() == self
    }

    /// Return an error unless `media_type` belongs to this family.
    pub fn check(self, media_type: MediaType) -> Result<(), SchemaError> {
        if self.accepts(media_type) {
            Ok(())
        } else {
            Err(SchemaError::MixedMediaType {
                entry: media_type.to_string(),
                format: self.to_string(),
            })
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Docker => f.write_str("docker"),
            Format::Oci => f.write_str("oci"),
        }
    }
}

impl FromStr for Format {
    type Err = SchemaError;

    /// Accepts `docker`, `oci`, or the full index media type of either family.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" | "v2s2" => Ok(Format::Docker),
            "oci" => Ok(Format::Oci),
            other => match MediaType::parse(other) {
                Ok(m) if m.is_index() => Ok(m.format()),
                _ => Err(SchemaError::UnsupportedMediaType(s.to_owned())),
            },
        }
    }
}
