//! Resource identifiers and stream path parsing.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::registry::RegistryError;

/// Length of a hex-encoded info hash.
const INFO_HASH_HEX_LEN: usize = 40;

/// Length of the reserved 64-character addressing scheme.
const RESERVED_ID_LEN: usize = 64;

/// Normalized (lowercase) 40-hex-character resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Parses and normalizes a resource identifier.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotImplementedAddressing` - 64-character identifier
    /// - `RegistryError::InvalidPath` - Anything else that is not 40 hex characters
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        if raw.len() == INFO_HASH_HEX_LEN && hex::decode(raw).is_ok() {
            return Ok(Self(raw.to_ascii_lowercase()));
        }

        if raw.len() == RESERVED_ID_LEN {
            return Err(RegistryError::NotImplementedAddressing { id: raw.to_string() });
        }

        Err(RegistryError::InvalidPath {
            path: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Magnet URI used as the default torrent source.
    pub fn magnet_uri(&self) -> String {
        format!("magnet:?xt=urn:btih:{}", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parsed `{id}/{fileIndex}` stream path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub id: ResourceId,
    pub file_index: usize,
}

impl ResourcePath {
    /// Parses a stream path, ignoring empty segments and leading slashes.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidPath` - Id segment is missing or malformed
    /// - `RegistryError::NotImplementedAddressing` - Reserved 64-character id
    /// - `RegistryError::InvalidFileIndex` - Index segment is not a non-negative integer
    pub fn parse(path: &str) -> Result<Self, RegistryError> {
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());

        let id_segment = segments.next().ok_or_else(|| RegistryError::InvalidPath {
            path: path.to_string(),
        })?;
        let id = ResourceId::parse(id_segment).map_err(|err| match err {
            RegistryError::InvalidPath { .. } => RegistryError::InvalidPath {
                path: path.to_string(),
            },
            other => other,
        })?;

        let index_segment = segments.next().unwrap_or_default();
        let file_index = index_segment
            .parse::<usize>()
            .map_err(|_| RegistryError::InvalidFileIndex {
                segment: index_segment.to_string(),
            })?;

        Ok(Self { id, file_index })
    }
}
