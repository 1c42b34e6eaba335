//! Builds the container a get script runs in

use crate::error::FetchResult;
use crate::resource::{resources_dir, ResourceTypes};
use crate::session::{BuildMetadata, Session};
use crate::worker::{Container, ContainerSpec, ImageSpec, Volume, VolumeMount, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Creates fetch containers with a cache volume mounted at `resources_dir("get")`
#[async_trait]
pub trait FetchContainerCreator: Send + Sync {
    async fn create_with_volume(
        &self,
        resource_type: &str,
        volume: Arc<dyn Volume>,
        worker: &dyn Worker,
    ) -> FetchResult<Arc<dyn Container>>;
}

/// Produces a [`FetchContainerCreator`] per fetch request
pub trait FetchContainerCreatorFactory: Send + Sync {
    fn new_fetch_container_creator(
        &self,
        resource_types: ResourceTypes,
        tags: Vec<String>,
        session: Session,
        metadata: BuildMetadata,
    ) -> Arc<dyn FetchContainerCreator>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFetchContainerCreatorFactory;

impl FetchContainerCreatorFactory for DefaultFetchContainerCreatorFactory {
    fn new_fetch_container_creator(
        &self,
        resource_types: ResourceTypes,
        tags: Vec<String>,
        session: Session,
        metadata: BuildMetadata,
    ) -> Arc<dyn FetchContainerCreator> {
        Arc::new(DefaultFetchContainerCreator {
            resource_types,
            tags,
            session,
            metadata,
        })
    }
}

/// Factory with no caching or retries; failures propagate as-is
#[derive(Debug, Clone)]
pub struct DefaultFetchContainerCreator {
    resource_types: ResourceTypes,
    tags: Vec<String>,
    session: Session,
    metadata: BuildMetadata,
}

impl DefaultFetchContainerCreator {
    /// Container specification for fetching `resource_type` into `volume`
    pub fn container_spec(&self, resource_type: &str, volume: Arc<dyn Volume>) -> ContainerSpec {
        ContainerSpec {
            image: ImageSpec {
                resource_type: resource_type.to_string(),
                privileged: true,
            },
            ephemeral: self.session.ephemeral,
            tags: self.tags.clone(),
            env: self.metadata.env(),
            outputs: vec![VolumeMount {
                volume,
                mount_path: resources_dir("get"),
            }],
        }
    }
}

#[async_trait]
impl FetchContainerCreator for DefaultFetchContainerCreator {
    async fn create_with_volume(
        &self,
        resource_type: &str,
        volume: Arc<dyn Volume>,
        worker: &dyn Worker,
    ) -> FetchResult<Arc<dyn Container>> {
        debug!(
            worker = worker.name(),
            session = %self.session.id,
            volume = volume.handle(),
            resource_type,
            "creating fetch container"
        );

        let spec = self.container_spec(resource_type, volume);
        worker
            .create_container(&self.session, spec, &self.resource_types)
            .await
    }
}
