//! Configuration schema for resfetch
//!
//! Configuration is stored at `~/.config/resfetch/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Fetch protocol settings
    pub fetch: FetchConfig,

    /// Local worker backend
    pub local: LocalConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Verbosity: 0 = warn, 1 = info, 2+ = debug
    pub verbose: u8,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            log_format: "text".to_string(),
        }
    }
}

/// Fetch protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// How long to wait before retrying a contended cache lock
    pub lock_poll_interval_ms: u64,
}

impl FetchConfig {
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval_ms: 5000,
        }
    }
}

/// Local worker backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory holding worker volumes and lock files
    pub root: PathBuf,

    /// Directory with one sub-directory per base resource type, each holding an `in` script
    pub resource_types_dir: PathBuf,

    /// Workers hosted by this node
    pub workers: Vec<LocalWorkerConfig>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("resfetch"),
            resource_types_dir: PathBuf::from("/opt/resource-types"),
            workers: vec![],
        }
    }
}

impl LocalConfig {
    /// Per-worker state directories
    pub fn workers_dir(&self) -> PathBuf {
        self.root.join("workers")
    }

    /// Lock files for cache initialization
    pub fn lock_dir(&self) -> PathBuf {
        self.root.join("locks")
    }
}

/// A single local worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalWorkerConfig {
    /// Unique worker name
    pub name: String,

    /// Base resource types this worker can run
    #[serde(default)]
    pub resource_types: Vec<String>,

    /// Tags advertised by this worker
    #[serde(default)]
    pub tags: Vec<String>,

    /// Team owning this worker (None = shared across teams)
    #[serde(default)]
    pub team_id: Option<i64>,
}
