//! Container session identity

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifies the container of one logical step, stable across retries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: String,

    /// Container metadata (step name, pipeline, build id, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Whether the container should be reaped as soon as it is released
    #[serde(default)]
    pub ephemeral: bool,
}

impl Session {
    /// Create a session with a known ID
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: BTreeMap::new(),
            ephemeral: false,
        }
    }

    /// Create a session with a fresh random ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }
}
