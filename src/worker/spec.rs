//! Placement and container specifications

use crate::resource::types::Labels;
use crate::worker::Volume;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Constraints a worker must satisfy to run a resource's scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub resource_type: String,
    pub tags: Vec<String>,
    pub team_id: i64,
}

/// Image a container is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Resource type whose image provides the scripts
    pub resource_type: String,
    /// Run with elevated privileges
    pub privileged: bool,
}

/// A volume bound into a container
#[derive(Clone)]
pub struct VolumeMount {
    pub volume: Arc<dyn Volume>,
    pub mount_path: String,
}

impl fmt::Debug for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeMount")
            .field("volume", &self.volume.handle())
            .field("mount_path", &self.mount_path)
            .finish()
    }
}

/// Container configuration handed to a worker
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: ImageSpec,
    /// Reap the container as soon as it is released
    pub ephemeral: bool,
    pub tags: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Volumes the container writes into
    pub outputs: Vec<VolumeMount>,
}

/// Request for a volume with create-or-attach semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Stable key; concurrent requests with the same key attach to one volume
    pub key: String,
    /// Labels recorded on the volume when it is created
    pub labels: Labels,
}
