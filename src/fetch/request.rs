//! Everything needed to fetch one resource version

use crate::resource::{ResourceIdentity, ResourceTypes};
use crate::session::{BuildMetadata, Session};
use crate::worker::{LineSink, WorkerSpec};
use std::fmt;

/// A request to make one resource version available on some worker
#[derive(Clone)]
pub struct FetchRequest {
    /// Session of the step's container, stable across retries
    pub session: Session,
    /// Worker tags the placement must satisfy
    pub tags: Vec<String>,
    pub team_id: i64,
    /// Custom resource types visible to the pipeline
    pub resource_types: ResourceTypes,
    pub metadata: BuildMetadata,
    pub identity: ResourceIdentity,
    /// Receives the get script's stderr
    pub stderr: Option<LineSink>,
}

impl FetchRequest {
    pub fn new(session: Session, identity: ResourceIdentity) -> Self {
        Self {
            session,
            tags: Vec::new(),
            team_id: 0,
            resource_types: ResourceTypes::default(),
            metadata: BuildMetadata::default(),
            identity,
            stderr: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_team(mut self, team_id: i64) -> Self {
        self.team_id = team_id;
        self
    }

    pub fn with_resource_types(mut self, resource_types: ResourceTypes) -> Self {
        self.resource_types = resource_types;
        self
    }

    pub fn with_metadata(mut self, metadata: BuildMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_stderr(mut self, stderr: LineSink) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Placement constraints for this request
    pub fn worker_spec(&self) -> WorkerSpec {
        WorkerSpec {
            resource_type: self.identity.resource_type().to_string(),
            tags: self.tags.clone(),
            team_id: self.team_id,
        }
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("session", &self.session.id)
            .field("tags", &self.tags)
            .field("team_id", &self.team_id)
            .field("resource_type", &self.identity.resource_type())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}
