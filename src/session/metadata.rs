//! Build metadata exposed to fetch scripts as environment variables

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes the build a fetch runs for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildMetadata {
    pub build_id: Option<i64>,
    pub build_name: Option<String>,
    pub job_name: Option<String>,
    pub pipeline_name: Option<String>,
    pub team_name: Option<String>,
    pub external_url: Option<String>,
}

impl BuildMetadata {
    /// Environment for the fetch container; unset fields are omitted
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        if let Some(id) = self.build_id {
            env.insert("BUILD_ID".to_string(), id.to_string());
        }

        let strings = [
            ("BUILD_NAME", &self.build_name),
            ("BUILD_JOB_NAME", &self.job_name),
            ("BUILD_PIPELINE_NAME", &self.pipeline_name),
            ("BUILD_TEAM_NAME", &self.team_name),
            ("ATC_EXTERNAL_URL", &self.external_url),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                env.insert(key.to_string(), value.clone());
            }
        }

        env
    }
}
