//! Session and build context of a fetch request

pub mod metadata;
pub mod state;

pub use metadata::BuildMetadata;
pub use state::Session;
