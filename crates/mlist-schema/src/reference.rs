//! Image reference parsing.
//!
//! Resolves strings like `ghcr.io/org/image:v1` or `alpine@sha256:...` into
//! structured components. Purely local; nothing is fetched.

use crate::types::{is_valid_digest, Digest};
use crate::SchemaError;
use std::fmt;
use std::str::FromStr;

/// Registry used when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when a reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

/// A parsed image or index reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, with optional port (e.g. `ghcr.io`, `localhost:5000`).
    pub registry: String,
    /// Repository path (e.g. `library/alpine`).
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse a reference.
    ///
    /// - `alpine` -> `docker.io/library/alpine:latest`
    /// - `user/app:1.0` -> `docker.io/user/app:1.0`
    /// - `localhost:5000/app@sha256:...` -> digest form, no tag
    pub fn parse(reference: &str) -> Result<Self, SchemaError> {
        let input = reference.trim();
        let invalid = |reason: &str| SchemaError::InvalidReference {
            reference: reference.to_owned(),
            reason: reason.to_owned(),
        };
        if input.is_empty() {
            return Err(invalid("empty reference"));
        }
        if input.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (name_tag, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !is_valid_digest(digest) {
                    return Err(invalid("digest must be sha256:<64 lowercase hex>"));
                }
                (name, Some(Digest::parse(digest)?))
            }
            None => (input, None),
        };

        // A tag is whatever follows the last ':' after the last '/'.
        let last_slash = name_tag.rfind('/').map_or(0, |p| p + 1);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&name_tag[..split], Some(&name_tag[split + 1..]))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = tag {
            if !is_valid_tag(tag) {
                return Err(invalid("tag must match [A-Za-z0-9_][A-Za-z0-9_.-]{0,127}"));
            }
        }

        let (registry, repository) = split_registry(name);
        if registry.is_empty() {
            return Err(invalid("empty registry host"));
        }
        if repository.is_empty() {
            return Err(invalid("empty repository"));
        }
        if let Some(bad) = repository.split('/').find(|c| !is_valid_component(c)) {
            return Err(invalid(&format!(
                "repository component '{bad}' must be lowercase alphanumerics separated by '.', '_', '__' or '-'"
            )));
        }

        let tag = match (tag, &digest) {
            (Some(t), _) => Some(t.to_owned()),
            (None, None) => Some(DEFAULT_TAG.to_owned()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Whether the reference pins content by digest.
    pub fn is_digest(&self) -> bool {
        self.digest.is_some()
    }

    /// The part used in `/v2/<repo>/manifests/<reference>`: digest if present, else tag.
    pub fn reference_str(&self) -> &str {
        match (&self.digest, &self.tag) {
            (Some(d), _) => d.as_str(),
            (None, Some(t)) => t,
            (None, None) => DEFAULT_TAG,
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_reference(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Fully qualified form, e.g. `docker.io/library/alpine:latest`.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_reference();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest.as_str());
        }
        s
    }

    /// Same repository, addressed by `digest` instead of tag.
    #[must_use]
    pub fn with_digest(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_reference())
    }
}

impl FromStr for ImageReference {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split `name` into registry and repository.
///
/// The first component is a registry when it contains '.' or ':' or is
/// `localhost`; otherwise the default registry applies and single-component
/// names live under `library/`.
fn split_registry(name: &str) -> (String, String) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first.to_owned(), rest.to_owned());
        }
        return (DEFAULT_REGISTRY.to_owned(), name.to_owned());
    }
    if name.is_empty() {
        return (DEFAULT_REGISTRY.to_owned(), String::new());
    }
    (DEFAULT_REGISTRY.to_owned(), format!("library/{name}"))
}

/// `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`
fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if bytes.is_empty() || !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if alnum(b) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !alnum(bytes[i]) {
            i += 1;
        }
        let sep = &component[start..i];
        let ok = sep == "." || sep == "_" || sep == "__" || sep.bytes().all(|c| c == b'-');
        if !ok {
            return false;
        }
    }
    true
}

/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
fn is_valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}
