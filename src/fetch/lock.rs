//! Named locks guarding cache initialization
//!
//! A lock is held for as long as its [`LockGuard`] lives. Acquisition never
//! blocks; callers poll (see [`Fetcher`](crate::fetch::Fetcher)).

use crate::error::{FetchError, FetchResult};
use async_trait::async_trait;
use fs2::FileExt;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Proof of holding a named lock; releases it on drop
pub struct LockGuard {
    name: String,
    _held: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    /// Wrap whatever keeps the lock held; dropping `held` must release it
    pub fn new(name: impl Into<String>, held: impl Any + Send + Sync) -> Self {
        Self {
            name: name.into(),
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

#[async_trait]
pub trait LockFactory: Send + Sync {
    /// Try to take the lock `name`; `Ok(None)` when someone else holds it
    async fn try_acquire(&self, name: &str) -> FetchResult<Option<LockGuard>>;
}

/// Cross-process locks backed by `flock` on files in one directory
#[derive(Debug, Clone)]
pub struct FileLockFactory {
    dir: PathBuf,
}

impl FileLockFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    fn try_lock(&self, name: &str) -> FetchResult<Option<FileLock>> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            FetchError::io(format!("Failed to create lock directory {}", self.dir.display()), e)
        })?;

        let path = self.lock_path(name);
        // The file is never removed: unlinking while another process waits
        // on its descriptor would let two holders coexist.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| FetchError::io(format!("Failed to open lock file {}", path.display()), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(FetchError::LockUnavailable(format!("{}: {e}", path.display()))),
        }
    }
}

struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[async_trait]
impl LockFactory for FileLockFactory {
    async fn try_acquire(&self, name: &str) -> FetchResult<Option<LockGuard>> {
        let factory = self.clone();
        let owned = name.to_string();
        let lock = tokio::task::spawn_blocking(move || factory.try_lock(&owned))
            .await
            .map_err(|e| FetchError::Internal(format!("lock task failed: {e}")))??;

        debug!(lock = name, acquired = lock.is_some(), "file lock attempt");
        Ok(lock.map(|held| LockGuard::new(name, held)))
    }
}

/// In-process locks, for single-process deployments and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryLockFactory {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryLockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held
    pub fn is_held(&self, name: &str) -> bool {
        lock_set(&self.held).contains(name)
    }
}

fn lock_set(held: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MemoryLock {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        lock_set(&self.held).remove(&self.name);
    }
}

#[async_trait]
impl LockFactory for MemoryLockFactory {
    async fn try_acquire(&self, name: &str) -> FetchResult<Option<LockGuard>> {
        if !lock_set(&self.held).insert(name.to_string()) {
            return Ok(None);
        }
        let held = MemoryLock {
            name: name.to_string(),
            held: self.held.clone(),
        };
        Ok(Some(LockGuard::new(name, held)))
    }
}
