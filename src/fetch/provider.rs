//! Locating or provisioning the cache a fetch writes into

use crate::cache::ResourceInstance;
use crate::error::FetchResult;
use crate::fetch::container_creator::FetchContainerCreator;
use crate::fetch::request::FetchRequest;
use crate::fetch::source::{ContainerFetchSource, FetchSource, VolumeFetchSource};
use crate::resource::resources_dir;
use crate::worker::{Container, Volume, WorkerClient};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Produces the [`FetchSource`] for one request
#[async_trait]
pub trait FetchSourceProvider: Send + Sync {
    /// Reuse the session's container if it has the cache mounted, otherwise
    /// place the fetch on a worker and find or create its cache volume there.
    /// Never runs a script.
    async fn get(&self) -> FetchResult<Box<dyn FetchSource>>;
}

pub trait FetchSourceProviderFactory: Send + Sync {
    fn new_fetch_source_provider(
        &self,
        request: FetchRequest,
        resource_instance: Arc<dyn ResourceInstance>,
        container_creator: Arc<dyn FetchContainerCreator>,
    ) -> Box<dyn FetchSourceProvider>;
}

#[derive(Clone)]
pub struct DefaultFetchSourceProviderFactory {
    worker_client: Arc<dyn WorkerClient>,
}

impl DefaultFetchSourceProviderFactory {
    pub fn new(worker_client: Arc<dyn WorkerClient>) -> Self {
        Self { worker_client }
    }
}

impl FetchSourceProviderFactory for DefaultFetchSourceProviderFactory {
    fn new_fetch_source_provider(
        &self,
        request: FetchRequest,
        resource_instance: Arc<dyn ResourceInstance>,
        container_creator: Arc<dyn FetchContainerCreator>,
    ) -> Box<dyn FetchSourceProvider> {
        Box::new(DefaultFetchSourceProvider {
            request,
            resource_instance,
            container_creator,
            worker_client: self.worker_client.clone(),
        })
    }
}

struct DefaultFetchSourceProvider {
    request: FetchRequest,
    resource_instance: Arc<dyn ResourceInstance>,
    container_creator: Arc<dyn FetchContainerCreator>,
    worker_client: Arc<dyn WorkerClient>,
}

/// The volume mounted at the get directory, if any
fn find_cache_volume(container: &dyn Container) -> Option<Arc<dyn Volume>> {
    let get_dir = resources_dir("get");
    container
        .volume_mounts()
        .into_iter()
        .find(|mount| mount.mount_path == get_dir)
        .map(|mount| mount.volume)
}

#[async_trait]
impl FetchSourceProvider for DefaultFetchSourceProvider {
    async fn get(&self) -> FetchResult<Box<dyn FetchSource>> {
        let session = &self.request.session.id;
        let identity = &self.request.identity;

        let existing = self
            .worker_client
            .find_container_for_identifier(session)
            .await
            .inspect_err(|e| {
                error!(session = %session, error = %e, "failed to look for existing container")
            })?;

        if let Some(container) = existing {
            if let Some(volume) = find_cache_volume(container.as_ref()) {
                debug!(
                    session = %session,
                    container = container.handle(),
                    volume = volume.handle(),
                    "reusing fetch container"
                );
                return Ok(Box::new(ContainerFetchSource::new(
                    identity.clone(),
                    container,
                    volume,
                    self.request.stderr.clone(),
                )));
            }
        }

        let spec = self.request.worker_spec();
        let worker = self
            .worker_client
            .satisfying(&spec, &self.request.resource_types)
            .await
            .inspect_err(|e| error!(resource_type = %spec.resource_type, error = %e, "no workers satisfying spec"))?;

        let found = self
            .resource_instance
            .find_on(worker.as_ref())
            .await
            .inspect_err(|e| error!(worker = worker.name(), error = %e, "failed to look for cache"))?;

        let volume = match found {
            Some(volume) => {
                debug!(worker = worker.name(), volume = volume.handle(), "found cache");
                volume
            }
            None => {
                debug!(worker = worker.name(), "no cache found");
                self.resource_instance
                    .find_or_create_on(worker.as_ref())
                    .await
                    .inspect_err(|e| error!(worker = worker.name(), error = %e, "failed to create cache"))?
            }
        };

        Ok(Box::new(VolumeFetchSource::new(
            identity.clone(),
            volume,
            worker,
            self.container_creator.clone(),
            self.request.stderr.clone(),
        )))
    }
}
