//! Fetch sources: a handle over one cache volume for the duration of a get
//!
//! A source is either backed by a container that already has the cache
//! volume mounted (a retried step reattaching to its own container) or by a
//! bare cache volume that a container is created for on demand.
//!
//! Population is guarded by an external lock named by [`FetchSource::lock_name`];
//! the source itself does no in-process locking.

use crate::cache::{labels, CacheState, INITIALIZED_MARKER};
use crate::error::{FetchError, FetchResult};
use crate::fetch::container_creator::FetchContainerCreator;
use crate::resource::{resources_dir, Resource, ResourceIdentity, VersionResult, VersionedSource, GET_SCRIPT};
use crate::worker::{Container, LineSink, ProcessSpec, Volume, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a source within one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Persisted marker not read yet
    Unknown,
    NotInitialized,
    /// A get script is running into the volume
    Initializing,
    Initialized,
}

#[async_trait]
pub trait FetchSource: Send + Sync {
    /// Whether the cache already holds a completed fetch
    async fn is_initialized(&self) -> FetchResult<bool>;

    /// Name of the lock to hold around [`initialize`](FetchSource::initialize)
    fn lock_name(&self) -> FetchResult<String>;

    /// Version and metadata of the fetched content
    fn versioned_source(&self) -> VersionedSource;

    /// Pick up the result recorded by a fetch that already completed into
    /// this source's volume. `false` when no completed fetch is recorded.
    async fn reattach(&mut self) -> FetchResult<bool>;

    /// Populate the cache by running the get script.
    ///
    /// `ready` fires once the script is about to start. On any error,
    /// including cancellation, the cache is left uninitialized.
    async fn initialize(
        &mut self,
        cancel: &CancellationToken,
        ready: Option<oneshot::Sender<()>>,
    ) -> FetchResult<()>;

    /// Drop this handle; `ttl` hints when the underlying storage may be reclaimed.
    /// Safe to call more than once.
    async fn release(&self, ttl: Option<Duration>);
}

pub(crate) fn notify_ready(ready: Option<oneshot::Sender<()>>) {
    if let Some(tx) = ready {
        // The caller may have stopped waiting.
        let _ = tx.send(());
    }
}

/// Run the get script in `container`, writing into the mounted cache volume
async fn run_get(
    identity: &ResourceIdentity,
    container: &dyn Container,
    cancel: &CancellationToken,
    stderr: Option<LineSink>,
) -> FetchResult<VersionResult> {
    let resource = Resource::new(identity.clone());
    let spec = ProcessSpec {
        path: GET_SCRIPT.to_string(),
        args: vec![resources_dir("get")],
        stderr,
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Interrupted),
        result = resource.get(cancel, &spec, container) => result,
    }?;

    // A result racing the signal still counts as interrupted
    if cancel.is_cancelled() {
        return Err(FetchError::Interrupted);
    }

    Ok(result)
}

async fn read_state(volume: &dyn Volume) -> FetchResult<CacheState> {
    let marker = volume.property(labels::INITIALIZED).await?;
    Ok(CacheState::from_marker(marker.as_deref()))
}

/// Persist `result`, then the marker, so a marked volume carries its result
async fn record_result(volume: &dyn Volume, result: &VersionResult) -> FetchResult<()> {
    let json = serde_json::to_string(result)?;
    volume.set_property(labels::RESULT, &json).await?;
    volume
        .set_property(labels::INITIALIZED, INITIALIZED_MARKER)
        .await
}

/// Result of the completed fetch in `volume`.
///
/// `Ok(None)` when the volume is not initialized. A volume marked without a
/// recorded result yields `Some(None)`.
async fn completed_result(volume: &dyn Volume) -> FetchResult<Option<Option<VersionResult>>> {
    if !read_state(volume).await?.is_initialized() {
        return Ok(None);
    }
    let result = match volume.property(labels::RESULT).await? {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    Ok(Some(result))
}

fn versioned_source_of(
    result: Option<&VersionResult>,
    identity: &ResourceIdentity,
    volume: &dyn Volume,
) -> VersionedSource {
    match result {
        Some(result) => VersionedSource::from_result(result.clone(), volume.handle()),
        None => VersionedSource::new(identity.version().clone(), vec![], volume.handle()),
    }
}

/// Source reusing a container that already has the cache volume mounted
pub struct ContainerFetchSource {
    identity: ResourceIdentity,
    container: Arc<dyn Container>,
    volume: Arc<dyn Volume>,
    stderr: Option<LineSink>,
    result: Option<VersionResult>,
    attached: bool,
}

impl ContainerFetchSource {
    pub fn new(
        identity: ResourceIdentity,
        container: Arc<dyn Container>,
        volume: Arc<dyn Volume>,
        stderr: Option<LineSink>,
    ) -> Self {
        Self {
            identity,
            container,
            volume,
            stderr,
            result: None,
            attached: false,
        }
    }
}

#[async_trait]
impl FetchSource for ContainerFetchSource {
    async fn is_initialized(&self) -> FetchResult<bool> {
        Ok(true)
    }

    fn lock_name(&self) -> FetchResult<String> {
        self.identity.lock_name(self.container.worker_name())
    }

    fn versioned_source(&self) -> VersionedSource {
        versioned_source_of(self.result.as_ref(), &self.identity, self.volume.as_ref())
    }

    /// A failed or unfinished get leaves nothing on the volume to attach to
    async fn reattach(&mut self) -> FetchResult<bool> {
        if self.attached {
            return Ok(true);
        }
        let Some(result) = completed_result(self.volume.as_ref()).await? else {
            return Ok(false);
        };
        debug!(
            container = self.container.handle(),
            volume = self.volume.handle(),
            "reattached to completed fetch"
        );
        self.result = result;
        self.attached = true;
        Ok(true)
    }

    /// Run the get script again in the session's container
    async fn initialize(
        &mut self,
        cancel: &CancellationToken,
        ready: Option<oneshot::Sender<()>>,
    ) -> FetchResult<()> {
        if self.reattach().await? {
            notify_ready(ready);
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Interrupted);
        }

        info!(
            container = self.container.handle(),
            volume = self.volume.handle(),
            "rerunning get script in session container"
        );
        notify_ready(ready);

        let result = run_get(&self.identity, self.container.as_ref(), cancel, self.stderr.clone()).await?;
        record_result(self.volume.as_ref(), &result).await?;
        self.result = Some(result);
        self.attached = true;
        Ok(())
    }

    async fn release(&self, ttl: Option<Duration>) {
        if let Err(e) = self.container.release(ttl).await {
            warn!(container = self.container.handle(), error = %e, "failed to release container");
        }
    }
}

/// Source over a cache volume found or created on a chosen worker
pub struct VolumeFetchSource {
    identity: ResourceIdentity,
    volume: Arc<dyn Volume>,
    worker: Arc<dyn Worker>,
    container_creator: Arc<dyn FetchContainerCreator>,
    stderr: Option<LineSink>,
    container: Option<Arc<dyn Container>>,
    result: Option<VersionResult>,
    state: SourceState,
}

impl VolumeFetchSource {
    pub fn new(
        identity: ResourceIdentity,
        volume: Arc<dyn Volume>,
        worker: Arc<dyn Worker>,
        container_creator: Arc<dyn FetchContainerCreator>,
        stderr: Option<LineSink>,
    ) -> Self {
        Self {
            identity,
            volume,
            worker,
            container_creator,
            stderr,
            container: None,
            result: None,
            state: SourceState::Unknown,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    async fn populate(
        &mut self,
        cancel: &CancellationToken,
        ready: Option<oneshot::Sender<()>>,
    ) -> FetchResult<VersionResult> {
        let container = self
            .container_creator
            .create_with_volume(
                self.identity.resource_type(),
                self.volume.clone(),
                self.worker.as_ref(),
            )
            .await?;
        self.container = Some(container.clone());

        notify_ready(ready);

        let result = run_get(&self.identity, container.as_ref(), cancel, self.stderr.clone()).await?;
        record_result(self.volume.as_ref(), &result).await?;
        Ok(result)
    }
}

#[async_trait]
impl FetchSource for VolumeFetchSource {
    async fn is_initialized(&self) -> FetchResult<bool> {
        Ok(read_state(self.volume.as_ref()).await?.is_initialized())
    }

    fn lock_name(&self) -> FetchResult<String> {
        self.identity.lock_name(self.worker.name())
    }

    fn versioned_source(&self) -> VersionedSource {
        versioned_source_of(self.result.as_ref(), &self.identity, self.volume.as_ref())
    }

    async fn reattach(&mut self) -> FetchResult<bool> {
        if self.state == SourceState::Initialized {
            return Ok(true);
        }
        match completed_result(self.volume.as_ref()).await? {
            Some(result) => {
                self.result = result;
                self.state = SourceState::Initialized;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn initialize(
        &mut self,
        cancel: &CancellationToken,
        ready: Option<oneshot::Sender<()>>,
    ) -> FetchResult<()> {
        // Whoever held the lock before us may have finished the fetch already
        if self.reattach().await? {
            notify_ready(ready);
            return Ok(());
        }
        self.state = SourceState::NotInitialized;

        if cancel.is_cancelled() {
            return Err(FetchError::Interrupted);
        }

        info!(
            worker = self.worker.name(),
            volume = self.volume.handle(),
            resource_type = self.identity.resource_type(),
            "initializing cache"
        );
        self.state = SourceState::Initializing;

        match self.populate(cancel, ready).await {
            Ok(result) => {
                self.state = SourceState::Initialized;
                self.result = Some(result);
                info!(volume = self.volume.handle(), "cache initialized");
                Ok(())
            }
            Err(e) => {
                self.state = SourceState::NotInitialized;
                warn!(volume = self.volume.handle(), error = %e, "failed to initialize cache");
                Err(e)
            }
        }
    }

    async fn release(&self, ttl: Option<Duration>) {
        if let Some(container) = &self.container {
            if let Err(e) = container.release(ttl).await {
                warn!(container = container.handle(), error = %e, "failed to release container");
            }
        }
        if let Err(e) = self.volume.release(ttl).await {
            warn!(volume = self.volume.handle(), error = %e, "failed to release volume");
        }
    }
}
