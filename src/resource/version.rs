//! Fetch script results

use crate::resource::types::Version;
use serde::{Deserialize, Serialize};

/// A single `{name, value}` metadata entry emitted by a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

/// What a get script prints on stdout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResult {
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
}

/// The fetched version together with where its content lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSource {
    version: Version,
    metadata: Vec<MetadataField>,
    volume_handle: String,
}

impl VersionedSource {
    pub fn new(version: Version, metadata: Vec<MetadataField>, volume_handle: impl Into<String>) -> Self {
        Self {
            version,
            metadata,
            volume_handle: volume_handle.into(),
        }
    }

    /// Build from a script result written into `volume_handle`
    pub fn from_result(result: VersionResult, volume_handle: impl Into<String>) -> Self {
        Self::new(result.version, result.metadata, volume_handle)
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn metadata(&self) -> &[MetadataField] {
        &self.metadata
    }

    /// Handle of the cache volume holding the fetched content
    pub fn volume_handle(&self) -> &str {
        &self.volume_handle
    }
}
