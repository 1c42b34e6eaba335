//! Script execution capability
//!
//! Anything that can run a resource script implements [`Runner`]: a
//! container on a remote worker, a local process host, or a test double.

use crate::error::FetchResult;
use crate::resource::VersionResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receives a script's stderr, one line at a time
pub type LineSink = Arc<dyn Fn(String) + Send + Sync>;

/// How to invoke a resource script
#[derive(Clone)]
pub struct ProcessSpec {
    /// Script path inside the container
    pub path: String,
    /// Script arguments
    pub args: Vec<String>,
    /// Where stderr lines go
    pub stderr: Option<LineSink>,
}

impl fmt::Debug for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSpec")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Runs a resource script to completion
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `path` with `args`, writing `input` to stdin and decoding stdout into `output`.
    ///
    /// `recoverable` marks transport failures (lost container, dropped
    /// connection) as safe to retry from scratch. Returns
    /// [`FetchError::Interrupted`](crate::FetchError::Interrupted) once `cancel`
    /// fires.
    #[allow(clippy::too_many_arguments)]
    async fn run_script(
        &self,
        cancel: &CancellationToken,
        path: &str,
        args: &[String],
        input: &[u8],
        output: &mut VersionResult,
        stderr: Option<LineSink>,
        recoverable: bool,
    ) -> FetchResult<()>;
}
