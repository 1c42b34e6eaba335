//! Drives one fetch: find the source, take its lock, populate it once

use crate::cache::ResourceCacheInstance;
use crate::config::FetchConfig;
use crate::error::{FetchError, FetchResult};
use crate::fetch::container_creator::{DefaultFetchContainerCreatorFactory, FetchContainerCreatorFactory};
use crate::fetch::lock::LockFactory;
use crate::fetch::provider::{DefaultFetchSourceProviderFactory, FetchSourceProviderFactory};
use crate::fetch::request::FetchRequest;
use crate::fetch::source::{notify_ready, FetchSource};
use crate::worker::WorkerClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Fetcher {
    provider_factory: Arc<dyn FetchSourceProviderFactory>,
    container_creator_factory: Arc<dyn FetchContainerCreatorFactory>,
    locks: Arc<dyn LockFactory>,
    lock_poll_interval: Duration,
}

impl Fetcher {
    pub fn new(worker_client: Arc<dyn WorkerClient>, locks: Arc<dyn LockFactory>, config: &FetchConfig) -> Self {
        Self::with_factories(
            Arc::new(DefaultFetchSourceProviderFactory::new(worker_client)),
            Arc::new(DefaultFetchContainerCreatorFactory),
            locks,
            config,
        )
    }

    pub fn with_factories(
        provider_factory: Arc<dyn FetchSourceProviderFactory>,
        container_creator_factory: Arc<dyn FetchContainerCreatorFactory>,
        locks: Arc<dyn LockFactory>,
        config: &FetchConfig,
    ) -> Self {
        Self {
            provider_factory,
            container_creator_factory,
            locks,
            lock_poll_interval: config.lock_poll_interval(),
        }
    }

    /// Make the requested version available and return its source.
    ///
    /// Warm caches return without locking. Otherwise the source's lock is
    /// polled until acquired, the cache is re-checked under the lock and
    /// populated only if still empty. The caller owns the returned source and
    /// must [`release`](FetchSource::release) it; on error it is released here.
    pub async fn fetch(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
        ready: Option<oneshot::Sender<()>>,
    ) -> FetchResult<Box<dyn FetchSource>> {
        let container_creator = self.container_creator_factory.new_fetch_container_creator(
            request.resource_types.clone(),
            request.tags.clone(),
            request.session.clone(),
            request.metadata.clone(),
        );
        let resource_instance = Arc::new(ResourceCacheInstance::new(request.identity.clone()));
        let provider = self
            .provider_factory
            .new_fetch_source_provider(request, resource_instance, container_creator);

        let mut source = provider.get().await?;

        match self.fetch_with_lock(source.as_mut(), cancel, ready).await {
            Ok(()) => Ok(source),
            Err(e) => {
                source.release(None).await;
                Err(e)
            }
        }
    }

    async fn fetch_with_lock(
        &self,
        source: &mut dyn FetchSource,
        cancel: &CancellationToken,
        ready: Option<oneshot::Sender<()>>,
    ) -> FetchResult<()> {
        // A session container only counts as warm once its fetch is recorded
        if source.is_initialized().await? && source.reattach().await? {
            debug!("cache already initialized");
            notify_ready(ready);
            return Ok(());
        }

        let lock_name = source.lock_name()?;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Interrupted);
            }

            if let Some(_guard) = self.locks.try_acquire(&lock_name).await? {
                debug!(lock = %lock_name, "acquired lock");
                // Another holder may have populated the cache while we waited
                return source.initialize(cancel, ready).await;
            }

            info!(lock = %lock_name, "cache is being initialized elsewhere, waiting");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Interrupted),
                _ = tokio::time::sleep(self.lock_poll_interval) => {}
            }
        }
    }
}
