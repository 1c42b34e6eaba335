//! Fetching resource versions into worker caches
//!
//! Flow for one request:
//! 1. [`FetchSourceProvider::get`] reuses the session's container or finds
//!    or creates a cache volume on a satisfying worker
//! 2. The caller takes the lock named by [`FetchSource::lock_name`]
//! 3. [`FetchSource::initialize`] runs the get script if the cache is still empty
//! 4. [`FetchSource::release`] when done
//!
//! [`Fetcher`] performs steps 1 to 3 with a [`LockFactory`].

pub mod container_creator;
pub mod fetcher;
pub mod lock;
pub mod provider;
pub mod request;
pub mod source;

pub use container_creator::{
    DefaultFetchContainerCreator, DefaultFetchContainerCreatorFactory, FetchContainerCreator,
    FetchContainerCreatorFactory,
};
pub use fetcher::Fetcher;
pub use lock::{FileLockFactory, LockFactory, LockGuard, MemoryLockFactory};
pub use provider::{DefaultFetchSourceProviderFactory, FetchSourceProvider, FetchSourceProviderFactory};
pub use request::FetchRequest;
pub use source::{ContainerFetchSource, FetchSource, SourceState, VolumeFetchSource};
