//! Cache volume labels and state
//!
//! Cache volumes are found by label. The immutable labels are written when a
//! volume is created; the initialized marker and expiry are properties set
//! later in the volume's life.

use crate::error::FetchResult;
use crate::resource::{Labels, ResourceIdentity};
use chrono::{DateTime, Utc};
use std::fmt;

/// Volume label and property keys used to track resource caches
pub mod labels {
    /// Marks volume as a resource cache
    pub const RESOURCE_CACHE: &str = "io.resfetch.cache";
    /// The resource type the content was fetched with
    pub const RESOURCE_TYPE: &str = "io.resfetch.cache.type";
    /// Cache key of the resource identity
    pub const KEY: &str = "io.resfetch.cache.key";
    /// Creation timestamp (RFC3339)
    pub const CREATED_AT: &str = "io.resfetch.cache.created_at";
    /// Set once a get script populated the volume successfully
    pub const INITIALIZED: &str = "io.resfetch.cache.initialized";
    /// JSON `VersionResult` of the fetch that set the initialized marker
    pub const RESULT: &str = "io.resfetch.cache.result";
    /// Reclaim hint recorded on release (RFC3339)
    pub const EXPIRES_AT: &str = "io.resfetch.cache.expires_at";
}

/// Value stored under [`labels::INITIALIZED`]
pub const INITIALIZED_MARKER: &str = "yep";

/// Persisted state of a cache volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Volume exists but holds no complete fetch
    NotInitialized,
    /// A get script completed into the volume
    Initialized,
}

impl CacheState {
    /// Parse from the initialized property
    pub fn from_marker(marker: Option<&str>) -> Self {
        match marker {
            Some(INITIALIZED_MARKER) => Self::Initialized,
            _ => Self::NotInitialized,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized)
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "not-initialized"),
            Self::Initialized => write!(f, "initialized"),
        }
    }
}

/// Information about a cache volume
#[derive(Debug, Clone)]
pub struct CacheVolume {
    /// Volume handle
    pub handle: String,
    /// Resource type the cache belongs to
    pub resource_type: String,
    /// Cache key
    pub key: String,
    /// Current state of the cache
    pub state: CacheState,
    /// When the volume was created
    pub created_at: DateTime<Utc>,
    /// Reclaim hint, if the volume was released with a ttl
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheVolume {
    /// Labels that identify the cache volume of `identity`
    pub fn lookup_labels(identity: &ResourceIdentity) -> FetchResult<Labels> {
        let mut labels = Labels::new();
        labels.insert(labels::RESOURCE_CACHE.to_string(), "true".to_string());
        labels.insert(labels::KEY.to_string(), identity.cache_key()?);
        Ok(labels)
    }

    /// Labels recorded when creating the cache volume of `identity`
    pub fn creation_labels(identity: &ResourceIdentity) -> FetchResult<Labels> {
        let mut labels = Self::lookup_labels(identity)?;
        labels.insert(
            labels::RESOURCE_TYPE.to_string(),
            identity.resource_type().to_string(),
        );
        labels.insert(labels::CREATED_AT.to_string(), Utc::now().to_rfc3339());
        Ok(labels)
    }

    /// Try to parse from volume labels and properties
    pub fn from_labels(handle: &str, labels: &Labels) -> Option<Self> {
        // Must be a resource cache
        if labels.get(labels::RESOURCE_CACHE).map(String::as_str) != Some("true") {
            return None;
        }

        let key = labels.get(labels::KEY)?.clone();
        let resource_type = labels.get(labels::RESOURCE_TYPE).cloned().unwrap_or_default();
        let state = CacheState::from_marker(labels.get(labels::INITIALIZED).map(String::as_str));

        let created_at = labels
            .get(labels::CREATED_AT)
            .and_then(|s| parse_timestamp(s))
            .unwrap_or_else(Utc::now);
        let expires_at = labels.get(labels::EXPIRES_AT).and_then(|s| parse_timestamp(s));

        Some(Self {
            handle: handle.to_string(),
            resource_type,
            key,
            state,
            created_at,
            expires_at,
        })
    }

    /// Whether a release hint allows reclaiming the volume at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
