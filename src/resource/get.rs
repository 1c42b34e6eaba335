//! Runs a resource's get script through a [`Runner`]

use crate::error::FetchResult;
use crate::resource::identity::ResourceIdentity;
use crate::resource::version::VersionResult;
use crate::worker::{ProcessSpec, Runner};
use tokio_util::sync::CancellationToken;

/// Execution façade over one resource identity
#[derive(Debug, Clone)]
pub struct Resource {
    identity: ResourceIdentity,
}

impl Resource {
    pub fn new(identity: ResourceIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    /// Script input for this resource
    pub fn signature(&self) -> FetchResult<Vec<u8>> {
        self.identity.signature()
    }

    /// Run the get script described by `spec`.
    ///
    /// Runner errors are returned untouched so callers can tell transport
    /// failures from script failures.
    pub async fn get<R: Runner + ?Sized>(
        &self,
        cancel: &CancellationToken,
        spec: &ProcessSpec,
        runner: &R,
    ) -> FetchResult<VersionResult> {
        let signature = self.signature()?;
        let mut result = VersionResult::default();

        runner
            .run_script(
                cancel,
                &spec.path,
                &spec.args,
                &signature,
                &mut result,
                spec.stderr.clone(),
                true,
            )
            .await?;

        Ok(result)
    }
}
