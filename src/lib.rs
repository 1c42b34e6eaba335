//! resfetch - Resource fetch caching for CI workers
//!
//! Finds or provisions a worker-local cache volume for a resource version,
//! populates it at most once by running the resource type's get script, and
//! hands back the fetched version and metadata.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod resource;
pub mod session;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{FetchError, FetchResult};
pub use fetch::{FetchRequest, FetchSource, Fetcher};
pub use resource::{Resource, ResourceIdentity, VersionResult, VersionedSource};
pub use session::{BuildMetadata, Session};
