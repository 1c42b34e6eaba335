//! Resource identity: the cache key and the script signature
//!
//! Two identities are cache-equivalent when type, source and version match.
//! Params only influence how the script runs, so they are left out of the
//! cache key and the lock name but are part of the signature.

use crate::error::FetchResult;
use crate::resource::types::{Params, Source, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A declared resource at a specific version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    #[serde(rename = "type")]
    resource_type: String,
    source: Source,
    #[serde(default)]
    params: Params,
    #[serde(default)]
    version: Version,
}

/// Payload written to the fetch script's stdin
#[derive(Serialize)]
struct Signature<'a> {
    source: &'a Source,
    params: &'a Params,
    version: &'a Version,
}

#[derive(Serialize)]
struct CacheKeyInput<'a> {
    #[serde(rename = "type")]
    resource_type: &'a str,
    source: &'a Source,
    version: &'a Version,
}

#[derive(Serialize)]
struct LockKeyInput<'a> {
    #[serde(flatten)]
    cache: CacheKeyInput<'a>,
    worker: &'a str,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl ResourceIdentity {
    pub fn new(resource_type: impl Into<String>, source: Source) -> Self {
        Self {
            resource_type: resource_type.into(),
            source,
            params: Params::new(),
            version: Version::new(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether `other` addresses the same cached content
    pub fn is_cache_equivalent(&self, other: &ResourceIdentity) -> bool {
        self.resource_type == other.resource_type
            && self.source == other.source
            && self.version == other.version
    }

    /// JSON request handed to the fetch script
    pub fn signature(&self) -> FetchResult<Vec<u8>> {
        Ok(serde_json::to_vec(&Signature {
            source: &self.source,
            params: &self.params,
            version: &self.version,
        })?)
    }

    fn cache_key_input(&self) -> CacheKeyInput<'_> {
        CacheKeyInput {
            resource_type: &self.resource_type,
            source: &self.source,
            version: &self.version,
        }
    }

    /// Content address of this identity's cache volume (hex SHA-256)
    pub fn cache_key(&self) -> FetchResult<String> {
        let encoded = serde_json::to_vec(&self.cache_key_input())?;
        Ok(sha256_hex(&encoded))
    }

    /// Name of the lock guarding population of this identity's cache on `worker_name`
    pub fn lock_name(&self, worker_name: &str) -> FetchResult<String> {
        let encoded = serde_json::to_vec(&LockKeyInput {
            cache: self.cache_key_input(),
            worker: worker_name,
        })?;
        Ok(sha256_hex(&encoded))
    }
}
