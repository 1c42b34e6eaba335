//! Error types for resfetch
//!
//! All modules use `FetchResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for resfetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// All errors that can occur while locating, populating or reading a resource cache
#[derive(Error, Debug)]
pub enum FetchError {
    // Placement errors
    #[error("No worker satisfies resource type '{resource_type}' (tags: {tags:?}, team: {team_id})")]
    NoWorkerAvailable {
        resource_type: String,
        tags: Vec<String>,
        team_id: i64,
    },

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    // Cache errors
    #[error("Cache lookup failed on worker {worker}: {reason}")]
    CacheLookup { worker: String, reason: String },

    #[error("Container lookup failed for session {session}: {reason}")]
    ContainerLookup { session: String, reason: String },

    // Container errors
    #[error("Failed to create container on worker {worker}: {reason}")]
    ContainerCreation { worker: String, reason: String },

    // Script errors
    #[error("Resource script '{path}' failed: exit status {exit_status}\n\nstderr:\n{stderr}")]
    ScriptFailed {
        path: String,
        exit_status: i32,
        stderr: String,
        recoverable: bool,
    },

    #[error("Resource script transport failed: {reason}")]
    ScriptTransport { reason: String, recoverable: bool },

    #[error("Resource script produced invalid output: {0}")]
    ScriptOutput(String),

    // Cancellation and locking
    #[error("Fetch interrupted")]
    Interrupted,

    #[error("Failed to acquire lock {0}")]
    LockUnavailable(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FetchError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a cache lookup error
    pub fn cache_lookup(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheLookup {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    /// Create a container creation error
    pub fn container_creation(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerCreation {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failed operation may be retried from scratch.
    ///
    /// Script errors carry the flag the runner was invoked with.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ScriptTransport { recoverable, .. } | Self::ScriptFailed { recoverable, .. } => {
                *recoverable
            }
            Self::ContainerCreation { .. } | Self::LockUnavailable(_) => true,
            _ => false,
        }
    }

    /// Whether the error came from the caller's cancellation signal
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoWorkerAvailable { .. } => {
                Some("Check that a worker advertises this resource type, tags and team")
            }
            Self::UnknownResourceType(_) => {
                Some("Define the type under resource_types or install it on a worker")
            }
            Self::ConfigInvalid { .. } => Some("Fix the configuration file and retry"),
            _ => None,
        }
    }
}
