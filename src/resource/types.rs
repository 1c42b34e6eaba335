//! Resource configuration value types

use crate::error::{FetchError, FetchResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource source configuration (uri, credentials, branch, ...)
pub type Source = BTreeMap<String, serde_json::Value>;

/// Parameters passed to a fetch script; affect execution, not cache identity
pub type Params = BTreeMap<String, serde_json::Value>;

/// A concrete resource version, e.g. `{"ref": "abc"}`
pub type Version = BTreeMap<String, String>;

/// Volume and container labels
pub type Labels = BTreeMap<String, String>;

/// Custom resource types are resolved through at most this many hops
const MAX_TYPE_DEPTH: usize = 16;

/// A pipeline-defined resource type layered on top of another type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    /// Name resources use to refer to this type
    pub name: String,
    /// The type this one is built from (base type or another custom type)
    #[serde(rename = "type")]
    pub parent: String,
    /// Source used to fetch the type's image
    #[serde(default)]
    pub source: Source,
}

/// The set of custom resource types visible to a pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTypes(Vec<ResourceType>);

impl ResourceTypes {
    pub fn new(types: Vec<ResourceType>) -> Self {
        Self(types)
    }

    /// Look up a custom type by name
    pub fn lookup(&self, name: &str) -> Option<&ResourceType> {
        self.0.iter().find(|t| t.name == name)
    }

    /// Resolve a type name to the base type a worker must provide.
    ///
    /// Names that are not custom types are already base types.
    pub fn base_type(&self, name: &str) -> FetchResult<String> {
        let mut current = name;
        for _ in 0..MAX_TYPE_DEPTH {
            match self.lookup(current) {
                // A type named after its parent shadows a base type of the same name
                Some(custom) if custom.parent == custom.name => return Ok(custom.parent.clone()),
                Some(custom) => current = &custom.parent,
                None => return Ok(current.to_string()),
            }
        }
        Err(FetchError::UnknownResourceType(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
