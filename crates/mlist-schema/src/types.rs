//! Content digest newtype.
//!
//! `Digest` serializes as a plain string. Deserialization does not validate;
//! [`Index::validate`](crate::Index::validate) checks every digest after load.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::ops::Deref;

const SHA256_PREFIX: &str = "sha256:";
const SHA256_HEX_LEN: usize = 64;

/// A `sha256:<64 lowercase hex>` content hash identifying a manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        if is_valid_digest(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(SchemaError::InvalidDigest(s.to_owned()))
        }
    }

    /// Compute the sha256 digest of raw content.
    pub fn of(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{SHA256_PREFIX}{}", hex::encode(hash)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex part without the algorithm prefix.
    pub fn hex(&self) -> &str {
        self.0.strip_prefix(SHA256_PREFIX).unwrap_or(&self.0)
    }

    /// First 12 hex characters, used for display.
    pub fn short(&self) -> &str {
        let hex = self.hex();
        &hex[..hex.len().min(12)]
    }

    pub fn is_valid(&self) -> bool {
        is_valid_digest(&self.0)
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

pub(crate) fn is_valid_digest(s: &str) -> bool {
    match s.strip_prefix(SHA256_PREFIX) {
        Some(hex) => {
            hex.len() == SHA256_HEX_LEN
                && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        }
        None => false,
    }
}

impl Deref for Digest {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Digest {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Digest {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::str::FromStr for Digest {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
