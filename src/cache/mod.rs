//! Resource cache volumes
//!
//! Each resource identity owns at most one cache volume per worker, addressed
//! by the identity's cache key. A volume is only reused once it is marked
//! initialized; failed or interrupted fetches leave it unmarked.
//!
//! # Cache States
//!
//! | State | Marker | Description |
//! |-------|--------|-------------|
//! | Miss | - | No volume on the worker, one will be created |
//! | NotInitialized | unset | Volume exists, fetch pending, failed or in progress |
//! | Initialized | `yep` | Fetch completed, content reusable |

pub mod instance;
pub mod volume;

pub use instance::{ResourceCacheInstance, ResourceInstance};
pub use volume::{labels, CacheState, CacheVolume, INITIALIZED_MARKER};
