//! Single-host worker backend
//!
//! Workers are directories under the configured root. Volumes are
//! directories, containers are child processes running the resource type's
//! scripts from `resource_types_dir/<type>/`.

mod container;
mod volume;
mod worker;

pub use container::LocalContainer;
pub use volume::LocalVolume;
pub use worker::LocalWorker;

use crate::config::{LocalConfig, LocalWorkerConfig};
use crate::error::{FetchError, FetchResult};
use crate::resource::ResourceTypes;
use crate::worker::{Container, Worker, WorkerClient, WorkerSpec};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Name of the worker created when none are configured
pub const DEFAULT_WORKER_NAME: &str = "local";

/// [`WorkerClient`] over the workers hosted on this machine
pub struct LocalWorkerClient {
    workers: Vec<Arc<LocalWorker>>,
}

impl LocalWorkerClient {
    pub fn new(workers: Vec<Arc<LocalWorker>>) -> Self {
        Self { workers }
    }

    /// Build the configured workers, or one untagged shared worker running
    /// every type installed in `resource_types_dir`
    pub async fn from_config(config: &LocalConfig) -> FetchResult<Self> {
        let workers = if config.workers.is_empty() {
            vec![LocalWorkerConfig {
                name: DEFAULT_WORKER_NAME.to_string(),
                resource_types: installed_types(&config.resource_types_dir).await?,
                tags: vec![],
                team_id: None,
            }]
        } else {
            config.workers.clone()
        };

        let workers = workers
            .into_iter()
            .map(|worker| {
                let dir = config.workers_dir().join(&worker.name);
                Arc::new(LocalWorker::new(worker, dir, &config.resource_types_dir))
            })
            .collect();
        Ok(Self::new(workers))
    }

    pub fn workers(&self) -> &[Arc<LocalWorker>] {
        &self.workers
    }

    pub fn worker(&self, name: &str) -> Option<Arc<LocalWorker>> {
        self.workers.iter().find(|w| w.name() == name).cloned()
    }
}

/// Names of the sub-directories of `dir`
async fn installed_types(dir: &Path) -> FetchResult<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(FetchError::io(format!("listing {}", dir.display()), e)),
    };

    let mut types = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FetchError::io(format!("listing {}", dir.display()), e))?
    {
        if entry.path().is_dir() {
            types.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    types.sort();
    Ok(types)
}

#[async_trait]
impl WorkerClient for LocalWorkerClient {
    async fn find_container_for_identifier(
        &self,
        session_id: &str,
    ) -> FetchResult<Option<Arc<dyn Container>>> {
        for worker in &self.workers {
            if let Some(container) = worker.find_container(session_id).await {
                return Ok(Some(container as Arc<dyn Container>));
            }
        }
        Ok(None)
    }

    /// Team-owned workers win over shared ones, then configuration order
    async fn satisfying(
        &self,
        spec: &WorkerSpec,
        resource_types: &ResourceTypes,
    ) -> FetchResult<Arc<dyn Worker>> {
        let base_type = resource_types.base_type(&spec.resource_type)?;
        let candidates: Vec<&Arc<LocalWorker>> = self
            .workers
            .iter()
            .filter(|w| w.satisfies(&base_type, spec))
            .collect();

        let chosen = candidates
            .iter()
            .find(|w| w.team_id() == Some(spec.team_id))
            .or_else(|| candidates.first())
            .ok_or_else(|| FetchError::NoWorkerAvailable {
                resource_type: spec.resource_type.clone(),
                tags: spec.tags.clone(),
                team_id: spec.team_id,
            })?;

        debug!(worker = chosen.name(), resource_type = %base_type, "worker selected");
        Ok(Arc::clone(chosen) as Arc<dyn Worker>)
    }
}
