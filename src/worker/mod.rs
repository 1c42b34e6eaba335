//! Worker fleet abstraction
//!
//! The fetch layer only talks to workers, containers and volumes through
//! these traits:
//! - [`WorkerClient`]: placement and container lookup across the fleet
//! - [`Worker`]: one node; creates containers and cache volumes
//! - [`Container`]: a sandbox that can run resource scripts
//! - [`Volume`]: worker-local content with persisted properties
//!
//! [`local`] implements them for a single host.

pub mod local;
mod runner;
mod spec;

pub use runner::{LineSink, ProcessSpec, Runner};
pub use spec::{ContainerSpec, ImageSpec, VolumeMount, VolumeSpec, WorkerSpec};

use crate::error::FetchResult;
use crate::resource::types::{Labels, ResourceTypes};
use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Worker-local content store
#[async_trait]
pub trait Volume: Send + Sync {
    /// Stable identifier of this volume on its worker
    fn handle(&self) -> &str;

    /// Read a persisted property
    async fn property(&self, name: &str) -> FetchResult<Option<String>>;

    /// Persist a property, visible to every process sharing the volume
    async fn set_property(&self, name: &str, value: &str) -> FetchResult<()>;

    /// Drop the caller's reference; `ttl` hints when the volume may be reclaimed
    async fn release(&self, ttl: Option<Duration>) -> FetchResult<()>;
}

/// A sandboxed process host bound to volume mounts
#[async_trait]
pub trait Container: Runner {
    fn handle(&self) -> &str;

    /// Name of the worker hosting this container
    fn worker_name(&self) -> &str;

    fn volume_mounts(&self) -> Vec<VolumeMount>;

    /// Drop the caller's reference; `ttl` hints when the container may be reclaimed
    async fn release(&self, ttl: Option<Duration>) -> FetchResult<()>;
}

/// One node in the fleet
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Create a container for `session`
    async fn create_container(
        &self,
        session: &Session,
        spec: ContainerSpec,
        resource_types: &ResourceTypes,
    ) -> FetchResult<Arc<dyn Container>>;

    /// Find a volume carrying every label in `labels`
    async fn find_volume(&self, labels: &Labels) -> FetchResult<Option<Arc<dyn Volume>>>;

    /// Create the volume for `spec.key`, or attach to it if it already exists
    async fn find_or_create_volume(&self, spec: VolumeSpec) -> FetchResult<Arc<dyn Volume>>;
}

/// Fleet-wide operations
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Find the container previously created for a session
    async fn find_container_for_identifier(
        &self,
        session_id: &str,
    ) -> FetchResult<Option<Arc<dyn Container>>>;

    /// Pick a worker satisfying `spec`; fails with `NoWorkerAvailable` when none match
    async fn satisfying(
        &self,
        spec: &WorkerSpec,
        resource_types: &ResourceTypes,
    ) -> FetchResult<Arc<dyn Worker>>;
}
