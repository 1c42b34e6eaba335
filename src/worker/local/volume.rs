//! Directory-backed volumes
//!
//! Layout under the volume directory:
//! - `content/`: what scripts write into
//! - `labels.json`: labels fixed at creation
//! - `properties/<name>`: mutable properties, one file each

use crate::cache::labels;
use crate::error::{FetchError, FetchResult};
use crate::resource::Labels;
use crate::worker::Volume;
use async_trait::async_trait;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const LABELS_FILE: &str = "labels.json";
const PROPERTIES_DIR: &str = "properties";
const CONTENT_DIR: &str = "content";

#[derive(Debug, Clone)]
pub struct LocalVolume {
    handle: String,
    dir: PathBuf,
}

impl LocalVolume {
    pub(crate) fn new(handle: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            handle: handle.into(),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Host directory mounted into containers
    pub fn content_dir(&self) -> PathBuf {
        content_dir(&self.dir)
    }

    /// Create the sub-directories and record `labels`
    pub(crate) async fn initialize_layout(&self, labels: &Labels) -> FetchResult<()> {
        self.ensure_layout().await?;
        let json = serde_json::to_vec_pretty(labels)?;
        write_atomic(&self.dir.join(LABELS_FILE), &json).await
    }

    /// Make sure the sub-directories exist when attaching to a volume
    /// another caller is still creating
    pub(crate) async fn ensure_layout(&self) -> FetchResult<()> {
        for dir in [self.content_dir(), self.dir.join(PROPERTIES_DIR)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| FetchError::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(())
    }

    /// Labels recorded at creation, empty while creation is in flight
    pub async fn labels(&self) -> FetchResult<Labels> {
        let path = self.dir.join(LABELS_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Labels::new()),
            Err(e) => Err(FetchError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Labels overlaid with current properties
    pub async fn labels_and_properties(&self) -> FetchResult<Labels> {
        let mut merged = self.labels().await?;
        let dir = self.dir.join(PROPERTIES_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(merged),
            Err(e) => return Err(FetchError::io(format!("listing {}", dir.display()), e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::io(format!("listing {}", dir.display()), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip in-flight temp files
            if name.starts_with('.') {
                continue;
            }
            if let Some(value) = self.read_property(&name).await? {
                merged.insert(name, value);
            }
        }
        Ok(merged)
    }

    async fn read_property(&self, name: &str) -> FetchResult<Option<String>> {
        let path = self.dir.join(PROPERTIES_DIR).join(name);
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FetchError::io(format!("reading {}", path.display()), e)),
        }
    }
}

pub(crate) fn content_dir(volume_dir: &Path) -> PathBuf {
    volume_dir.join(CONTENT_DIR)
}

/// Write via a temp file and rename so readers never see partial content
async fn write_atomic(path: &Path, contents: &[u8]) -> FetchResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| FetchError::Internal(format!("{} has no parent", path.display())))?;
    let temp = parent.join(format!(".tmp-{}", Uuid::new_v4()));

    fs::write(&temp, contents)
        .await
        .map_err(|e| FetchError::io(format!("writing {}", temp.display()), e))?;
    fs::rename(&temp, path)
        .await
        .map_err(|e| FetchError::io(format!("renaming to {}", path.display()), e))
}

#[async_trait]
impl Volume for LocalVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn property(&self, name: &str) -> FetchResult<Option<String>> {
        if let Some(value) = self.read_property(name).await? {
            return Ok(Some(value));
        }
        Ok(self.labels().await?.remove(name))
    }

    async fn set_property(&self, name: &str, value: &str) -> FetchResult<()> {
        let dir = self.dir.join(PROPERTIES_DIR);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| FetchError::io(format!("creating {}", dir.display()), e))?;
        write_atomic(&dir.join(name), value.as_bytes()).await
    }

    /// `Some(ttl)` records an expiry; `None` leaves retention as it was
    async fn release(&self, ttl: Option<Duration>) -> FetchResult<()> {
        let Some(ttl) = ttl else {
            return Ok(());
        };
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| FetchError::Internal(format!("ttl out of range: {e}")))?;
        let expires_at = (Utc::now() + ttl).to_rfc3339();
        debug!(volume = %self.handle, expires_at = %expires_at, "releasing volume");
        self.set_property(labels::EXPIRES_AT, &expires_at).await
    }
}
