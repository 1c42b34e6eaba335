//! Resource identity, results and script execution

pub mod get;
pub mod identity;
pub mod types;
pub mod version;

pub use get::Resource;
pub use identity::ResourceIdentity;
pub use types::{Labels, Params, ResourceType, ResourceTypes, Source, Version};
pub use version::{MetadataField, VersionResult, VersionedSource};

/// Root of the per-step directories inside a container
pub const RESOURCES_ROOT: &str = "/tmp/build";

/// Directory where the image of every resource type keeps its scripts
pub const SCRIPTS_DIR: &str = "/opt/resource";

/// Path of the get script inside a resource container
pub const GET_SCRIPT: &str = "/opt/resource/in";

/// Path inside a container for a step's files, e.g. `resources_dir("get")`
pub fn resources_dir(suffix: &str) -> String {
    format!("{}/{}", RESOURCES_ROOT, suffix)
}
