//! Locating a resource's cache volume on a worker

use crate::cache::volume::CacheVolume;
use crate::error::FetchResult;
use crate::resource::ResourceIdentity;
use crate::worker::{Volume, VolumeSpec, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// The cache of one resource identity, as seen from any worker
#[async_trait]
pub trait ResourceInstance: Send + Sync {
    fn identity(&self) -> &ResourceIdentity;

    /// Find an existing cache volume on `worker`
    async fn find_on(&self, worker: &dyn Worker) -> FetchResult<Option<Arc<dyn Volume>>>;

    /// Create the cache volume on `worker`, attaching if a concurrent caller won the race
    async fn find_or_create_on(&self, worker: &dyn Worker) -> FetchResult<Arc<dyn Volume>>;
}

/// [`ResourceInstance`] backed by labelled worker volumes
#[derive(Debug, Clone)]
pub struct ResourceCacheInstance {
    identity: ResourceIdentity,
}

impl ResourceCacheInstance {
    pub fn new(identity: ResourceIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl ResourceInstance for ResourceCacheInstance {
    fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    async fn find_on(&self, worker: &dyn Worker) -> FetchResult<Option<Arc<dyn Volume>>> {
        let labels = CacheVolume::lookup_labels(&self.identity)?;
        worker.find_volume(&labels).await
    }

    async fn find_or_create_on(&self, worker: &dyn Worker) -> FetchResult<Arc<dyn Volume>> {
        let spec = VolumeSpec {
            key: self.identity.cache_key()?,
            labels: CacheVolume::creation_labels(&self.identity)?,
        };
        debug!(worker = worker.name(), key = %spec.key, "finding or creating cache volume");
        worker.find_or_create_volume(spec).await
    }
}
