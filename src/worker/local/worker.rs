//! A worker living in a directory on this host

use crate::cache::CacheVolume;
use crate::config::LocalWorkerConfig;
use crate::error::{FetchError, FetchResult};
use crate::resource::{Labels, ResourceTypes};
use crate::session::Session;
use crate::worker::local::container::{ContainerRegistry, HostMount, LocalContainer};
use crate::worker::local::volume::{content_dir, LocalVolume};
use crate::worker::{Container, ContainerSpec, Volume, VolumeSpec, Worker, WorkerSpec};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

const VOLUMES_DIR: &str = "volumes";

pub struct LocalWorker {
    config: LocalWorkerConfig,
    dir: PathBuf,
    resource_types_dir: PathBuf,
    containers: ContainerRegistry,
}

impl LocalWorker {
    /// `dir` holds this worker's volumes; `resource_types_dir` holds one
    /// script directory per base resource type
    pub fn new(config: LocalWorkerConfig, dir: impl Into<PathBuf>, resource_types_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            dir: dir.into(),
            resource_types_dir: resource_types_dir.into(),
            containers: ContainerRegistry::default(),
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.config.tags
    }

    pub fn team_id(&self) -> Option<i64> {
        self.config.team_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn volumes_dir(&self) -> PathBuf {
        self.dir.join(VOLUMES_DIR)
    }

    /// Whether this worker can run `base_type` for `spec`.
    ///
    /// Tagged requests need every tag; untagged requests only go to untagged
    /// workers. Team workers only serve their own team.
    pub fn satisfies(&self, base_type: &str, spec: &WorkerSpec) -> bool {
        let has_type = self.config.resource_types.iter().any(|t| t == base_type);
        let tags_match = if spec.tags.is_empty() {
            self.config.tags.is_empty()
        } else {
            spec.tags.iter().all(|tag| self.config.tags.contains(tag))
        };
        let team_match = self.config.team_id.map_or(true, |team| team == spec.team_id);

        has_type && tags_match && team_match
    }

    /// Container registered for `session_id`, unless its release ttl ran out
    pub async fn find_container(&self, session_id: &str) -> Option<Arc<LocalContainer>> {
        let mut containers = self.containers.write().await;
        prune_expired(&mut containers);
        containers.get(session_id).cloned()
    }

    /// Number of containers still registered
    pub async fn container_count(&self) -> usize {
        self.containers.read().await.len()
    }

    /// Every cache volume on this worker
    pub async fn list_caches(&self) -> FetchResult<Vec<CacheVolume>> {
        let mut caches = Vec::new();
        for volume in self.volumes().await? {
            let labels = volume.labels_and_properties().await?;
            if let Some(cache) = CacheVolume::from_labels(volume.handle(), &labels) {
                caches.push(cache);
            }
        }
        caches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(caches)
    }

    async fn volumes(&self) -> FetchResult<Vec<LocalVolume>> {
        let dir = self.volumes_dir();
        let lookup_err = |e: io::Error| FetchError::cache_lookup(&self.config.name, format!("{}: {e}", dir.display()));

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(lookup_err(e)),
        };

        let mut volumes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(lookup_err)? {
            let handle = entry.file_name().to_string_lossy().into_owned();
            volumes.push(LocalVolume::new(handle, entry.path()));
        }
        Ok(volumes)
    }

    fn volume(&self, handle: &str) -> LocalVolume {
        LocalVolume::new(handle, self.volumes_dir().join(handle))
    }

    /// Resolve a mount to the host directory of its volume
    async fn host_mount(&self, mount: &crate::worker::VolumeMount) -> FetchResult<HostMount> {
        let host_path = content_dir(&self.volumes_dir().join(mount.volume.handle()));
        if !fs::try_exists(&host_path).await.unwrap_or(false) {
            return Err(FetchError::container_creation(
                &self.config.name,
                format!("volume {} does not exist on this worker", mount.volume.handle()),
            ));
        }
        Ok(HostMount {
            mount: mount.clone(),
            host_path,
        })
    }
}

fn prune_expired(containers: &mut HashMap<String, Arc<LocalContainer>>) {
    let now = Utc::now();
    containers.retain(|session, container| {
        let expired = container.is_expired(now);
        if expired {
            debug!(session = %session, container = container.handle(), "dropping expired container");
        }
        !expired
    });
}

#[async_trait]
impl Worker for LocalWorker {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn create_container(
        &self,
        session: &Session,
        spec: ContainerSpec,
        resource_types: &ResourceTypes,
    ) -> FetchResult<Arc<dyn Container>> {
        let base_type = resource_types.base_type(&spec.image.resource_type)?;
        let scripts_dir = self.resource_types_dir.join(&base_type);
        if !fs::try_exists(&scripts_dir).await.unwrap_or(false) {
            return Err(FetchError::container_creation(
                &self.config.name,
                format!("resource type '{base_type}' is not installed at {}", scripts_dir.display()),
            ));
        }

        let mut mounts = Vec::with_capacity(spec.outputs.len());
        for output in &spec.outputs {
            mounts.push(self.host_mount(output).await?);
        }

        let container = Arc::new(LocalContainer::new(
            Uuid::new_v4().to_string(),
            self.config.name.clone(),
            session.id.clone(),
            spec.ephemeral,
            scripts_dir,
            spec.env,
            mounts,
            self.containers.clone(),
        ));

        {
            let mut containers = self.containers.write().await;
            prune_expired(&mut containers);
            containers.insert(session.id.clone(), container.clone());
        }

        debug!(
            worker = %self.config.name,
            session = %session.id,
            container = container.handle(),
            resource_type = %base_type,
            "container created"
        );
        Ok(container as Arc<dyn Container>)
    }

    async fn find_volume(&self, wanted: &Labels) -> FetchResult<Option<Arc<dyn Volume>>> {
        for volume in self.volumes().await? {
            let labels = volume.labels().await?;
            if wanted.iter().all(|(key, value)| labels.get(key) == Some(value)) {
                return Ok(Some(Arc::new(volume) as Arc<dyn Volume>));
            }
        }
        Ok(None)
    }

    async fn find_or_create_volume(&self, spec: VolumeSpec) -> FetchResult<Arc<dyn Volume>> {
        let root = self.volumes_dir();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| FetchError::cache_lookup(&self.config.name, format!("{}: {e}", root.display())))?;

        let volume = self.volume(&spec.key);
        match fs::create_dir(volume.dir()).await {
            Ok(()) => {
                volume.initialize_layout(&spec.labels).await?;
                info!(worker = %self.config.name, volume = %spec.key, "cache volume created");
            }
            // Lost the race to a concurrent creator
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                volume.ensure_layout().await?;
                debug!(worker = %self.config.name, volume = %spec.key, "attached to existing volume");
            }
            Err(e) => {
                return Err(FetchError::cache_lookup(
                    &self.config.name,
                    format!("creating {}: {e}", volume.dir().display()),
                ))
            }
        }

        Ok(Arc::new(volume) as Arc<dyn Volume>)
    }
}
