//! Host-process "containers"
//!
//! A local container runs resource scripts as plain child processes. Paths
//! under `/opt/resource` resolve to the resource type's script directory and
//! mount paths resolve to the mounted volume's content directory.

use crate::error::{FetchError, FetchResult};
use crate::resource::{VersionResult, SCRIPTS_DIR};
use crate::worker::{Container, LineSink, Runner, VolumeMount};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lines of stderr kept for error reports
const STDERR_TAIL_LINES: usize = 50;

/// Containers of one worker, keyed by session id
pub(crate) type ContainerRegistry = Arc<RwLock<HashMap<String, Arc<LocalContainer>>>>;

/// A mount resolved to a host directory
#[derive(Debug, Clone)]
pub(crate) struct HostMount {
    pub mount: VolumeMount,
    pub host_path: PathBuf,
}

pub struct LocalContainer {
    handle: String,
    worker_name: String,
    session_id: String,
    ephemeral: bool,
    scripts_dir: PathBuf,
    env: BTreeMap<String, String>,
    mounts: Vec<HostMount>,
    registry: ContainerRegistry,
    expires_at: Mutex<Option<DateTime<Utc>>>,
}

impl LocalContainer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: String,
        worker_name: String,
        session_id: String,
        ephemeral: bool,
        scripts_dir: PathBuf,
        env: BTreeMap<String, String>,
        mounts: Vec<HostMount>,
        registry: ContainerRegistry,
    ) -> Self {
        Self {
            handle,
            worker_name,
            session_id,
            ephemeral,
            scripts_dir,
            env,
            mounts,
            registry,
            expires_at: Mutex::new(None),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Expiry recorded by the last release with a ttl
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        *self.expires_at.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether a release with a ttl has run out by `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    /// Translate an in-container path to the host
    pub fn host_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = strip_dir(path, SCRIPTS_DIR) {
            return self.scripts_dir.join(rest);
        }
        for mount in &self.mounts {
            if let Some(rest) = strip_dir(path, &mount.mount.mount_path) {
                return mount.host_path.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

/// `path` relative to `dir` if it lies inside it
fn strip_dir<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(dir)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Last lines of a script's stderr for error reporting
fn stderr_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

struct ScriptOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<String>,
}

/// Feed stdin, collect stdout and stream stderr until the process exits
async fn drive_child(
    child: &mut Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    input: &[u8],
    sink: Option<LineSink>,
) -> std::io::Result<ScriptOutput> {
    let write = async move {
        let mut stdin = stdin;
        match stdin.write_all(input).await {
            // The script may exit without reading its input
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
        // stdin is dropped here, closing the pipe
    };

    let read = async move {
        let mut stdout = stdout;
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.map(|_| buf)
    };

    let stream = async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if let Some(sink) = &sink {
                sink(line.clone());
            }
            collected.push(line);
        }
        Ok::<_, std::io::Error>(collected)
    };

    let (written, stdout, stderr) = tokio::join!(write, read, stream);
    written?;
    let stdout = stdout?;
    let stderr = stderr?;
    let status = child.wait().await?;

    Ok(ScriptOutput {
        status,
        stdout,
        stderr,
    })
}

#[async_trait]
impl Runner for LocalContainer {
    async fn run_script(
        &self,
        cancel: &CancellationToken,
        path: &str,
        args: &[String],
        input: &[u8],
        output: &mut VersionResult,
        stderr: Option<LineSink>,
        recoverable: bool,
    ) -> FetchResult<()> {
        if cancel.is_cancelled() {
            return Err(FetchError::Interrupted);
        }

        let program = self.host_path(path);
        let host_args: Vec<PathBuf> = args.iter().map(|arg| self.host_path(arg)).collect();
        debug!(container = %self.handle, program = %program.display(), "running script");

        let transport = |reason: String| FetchError::ScriptTransport {
            reason,
            recoverable,
        };

        let mut child = Command::new(&program)
            .args(&host_args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| transport(format!("failed to start {}: {e}", program.display())))?;

        let (Some(child_stdin), Some(child_stdout), Some(child_stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(transport("script pipes unavailable".to_string()));
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = drive_child(&mut child, child_stdin, child_stdout, child_stderr, input, stderr) => Some(result),
        };

        let Some(result) = outcome else {
            if let Err(e) = child.kill().await {
                warn!(container = %self.handle, error = %e, "failed to kill script");
            }
            return Err(FetchError::Interrupted);
        };

        let finished = result.map_err(|e| transport(format!("script i/o failed: {e}")))?;

        if !finished.status.success() {
            return Err(FetchError::ScriptFailed {
                path: path.to_string(),
                // Killed by a signal when there is no code
                exit_status: finished.status.code().unwrap_or(-1),
                stderr: stderr_tail(&finished.stderr),
                recoverable,
            });
        }

        *output = serde_json::from_slice(&finished.stdout)
            .map_err(|e| FetchError::ScriptOutput(format!("{path}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Container for LocalContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn worker_name(&self) -> &str {
        &self.worker_name
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.mounts.iter().map(|m| m.mount.clone()).collect()
    }

    /// Ephemeral containers are forgotten right away; others keep the expiry
    async fn release(&self, ttl: Option<Duration>) -> FetchResult<()> {
        if self.ephemeral {
            let mut registry = self.registry.write().await;
            if registry
                .get(&self.session_id)
                .is_some_and(|c| c.handle == self.handle)
            {
                registry.remove(&self.session_id);
                debug!(container = %self.handle, "ephemeral container released");
            }
            return Ok(());
        }

        if let Some(ttl) = ttl {
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| FetchError::Internal(format!("ttl out of range: {e}")))?;
            *self.expires_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now() + ttl);
        }
        Ok(())
    }
}
