//! End-to-end tests for resfetch against the local worker backend
//!
//! Resource types are shell scripts installed into a temp directory.

#![cfg(unix)]

use resfetch::cache::{labels, ResourceCacheInstance, ResourceInstance, INITIALIZED_MARKER};
use resfetch::config::{FetchConfig, LocalConfig};
use resfetch::fetch::{
    DefaultFetchContainerCreatorFactory, DefaultFetchSourceProviderFactory, FetchContainerCreatorFactory,
    FetchSourceProvider, FetchSourceProviderFactory, FileLockFactory, MemoryLockFactory,
};
use resfetch::resource::{resources_dir, Source, Version, GET_SCRIPT};
use resfetch::worker::local::{LocalWorkerClient, DEFAULT_WORKER_NAME};
use resfetch::worker::ProcessSpec;
use resfetch::{BuildMetadata, FetchError, FetchRequest, FetchSource, Fetcher, Resource, ResourceIdentity, Session};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const GIT_IN: &str = r#"#!/bin/sh
set -e
payload=$(cat)
dest="$1"
echo "fetching into $dest" >&2
printf '%s' "$payload" > "$dest/signature.json"
printf '%s' "$BUILD_ID" > "$dest/build_id"
sleep "${FETCH_DELAY:-0}"
echo run >> "$(dirname "$0")/runs"
printf '{"version":{"ref":"abc"},"metadata":[{"name":"author","value":"alice"}]}'
"#;

const FAILING_IN: &str = r#"#!/bin/sh
cat > /dev/null
echo "could not resolve host" >&2
exit 128
"#;

const SLOW_IN: &str = r#"#!/bin/sh
cat > /dev/null
echo "started" >&2
exec sleep 30
"#;

struct Fixture {
    _temp: TempDir,
    config: LocalConfig,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let config = LocalConfig {
            root: temp.path().join("state"),
            resource_types_dir: temp.path().join("types"),
            workers: vec![],
        };
        Self { _temp: temp, config }
    }

    fn install(&self, resource_type: &str, script: &str) -> PathBuf {
        let dir = self.config.resource_types_dir.join(resource_type);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("in");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        dir
    }

    async fn client(&self) -> Arc<LocalWorkerClient> {
        Arc::new(LocalWorkerClient::from_config(&self.config).await.unwrap())
    }
}

fn identity(resource_type: &str) -> ResourceIdentity {
    ResourceIdentity::new(resource_type, Source::from([("uri".to_string(), json!("x"))]))
        .with_version(Version::from([("ref".to_string(), "abc".to_string())]))
}

fn request(resource_type: &str) -> FetchRequest {
    FetchRequest::new(Session::generate(), identity(resource_type)).with_metadata(BuildMetadata {
        build_id: Some(42),
        ..Default::default()
    })
}

fn provider(client: Arc<LocalWorkerClient>, request: FetchRequest) -> Box<dyn FetchSourceProvider> {
    let creator = DefaultFetchContainerCreatorFactory.new_fetch_container_creator(
        request.resource_types.clone(),
        request.tags.clone(),
        request.session.clone(),
        request.metadata.clone(),
    );
    let instance = Arc::new(ResourceCacheInstance::new(request.identity.clone()));
    DefaultFetchSourceProviderFactory::new(client).new_fetch_source_provider(request, instance, creator)
}

fn runs(scripts_dir: &Path) -> usize {
    std::fs::read_to_string(scripts_dir.join("runs"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn fast_config() -> FetchConfig {
    FetchConfig {
        lock_poll_interval_ms: 20,
    }
}

/// Fresh cache: created, populated once, reported initialized
#[tokio::test]
async fn scenario_a_fetch_into_new_cache() {
    let fixture = Fixture::new();
    let scripts = fixture.install("git", GIT_IN);
    let client = fixture.client().await;

    let mut source = provider(client.clone(), request("git")).get().await.unwrap();
    assert!(!source.is_initialized().await.unwrap());

    let (ready_tx, ready_rx) = oneshot::channel();
    source.initialize(&CancellationToken::new(), Some(ready_tx)).await.unwrap();
    assert!(ready_rx.await.is_ok());

    assert!(source.is_initialized().await.unwrap());
    let versioned = source.versioned_source();
    assert_eq!(versioned.version().get("ref").map(String::as_str), Some("abc"));
    assert_eq!(versioned.metadata()[0].value, "alice");
    assert_eq!(runs(&scripts), 1);

    let worker = client.worker(DEFAULT_WORKER_NAME).unwrap();
    let caches = worker.list_caches().await.unwrap();
    assert_eq!(caches.len(), 1);
    assert!(caches[0].state.is_initialized());

    let content = worker.dir().join("volumes").join(versioned.volume_handle()).join("content");
    let signature: serde_json::Value =
        serde_json::from_slice(&std::fs::read(content.join("signature.json")).unwrap()).unwrap();
    assert_eq!(signature["source"]["uri"], "x");
    assert_eq!(signature["version"]["ref"], "abc");
    assert_eq!(std::fs::read_to_string(content.join("build_id")).unwrap(), "42");

    source.release(Some(Duration::from_secs(300))).await;
}

/// Warm cache: found on the worker, no container created
#[tokio::test]
async fn scenario_b_reuse_existing_cache() {
    let fixture = Fixture::new();
    let scripts = fixture.install("git", GIT_IN);
    let client = fixture.client().await;
    let fetcher = Fetcher::new(client.clone(), Arc::new(MemoryLockFactory::new()), &fast_config());

    let first = fetcher.fetch(request("git"), &CancellationToken::new(), None).await.unwrap();
    first.release(None).await;

    let second_request = request("git");
    let session = second_request.session.id.clone();
    let second = provider(client.clone(), second_request).get().await.unwrap();

    assert!(second.is_initialized().await.unwrap());
    assert_eq!(second.versioned_source().volume_handle(), first.versioned_source().volume_handle());
    let worker = client.worker(DEFAULT_WORKER_NAME).unwrap();
    assert!(worker.find_container(&session).await.is_none());
    assert_eq!(runs(&scripts), 1);
}

/// Failing script: error surfaces unchanged and the cache stays cold
#[tokio::test]
async fn scenario_c_failed_fetch_does_not_poison_cache() {
    let fixture = Fixture::new();
    fixture.install("git", FAILING_IN);
    let client = fixture.client().await;
    let fetcher = Fetcher::new(client.clone(), Arc::new(MemoryLockFactory::new()), &fast_config());

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = lines.clone();
    let failing = request("git").with_stderr(Arc::new(move |line: String| {
        sink_lines.lock().unwrap().push(line);
    }));

    let err = match fetcher.fetch(failing, &CancellationToken::new(), None).await {
        Ok(_) => panic!("expected the get script to fail"),
        Err(e) => e,
    };
    match &err {
        FetchError::ScriptFailed {
            path,
            exit_status,
            stderr,
            recoverable,
        } => {
            assert_eq!(path, GET_SCRIPT);
            assert_eq!(*exit_status, 128);
            assert!(stderr.contains("could not resolve host"));
            assert!(*recoverable);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(lines.lock().unwrap().as_slice(), ["could not resolve host"]);

    let source = provider(client, request("git")).get().await.unwrap();
    assert!(!source.is_initialized().await.unwrap());
}

/// The facade hands runner errors back untouched
#[tokio::test]
async fn resource_get_returns_script_error_unchanged() {
    let fixture = Fixture::new();
    fixture.install("git", FAILING_IN);
    let client = fixture.client().await;
    let worker = client.worker(DEFAULT_WORKER_NAME).unwrap();

    let instance = ResourceCacheInstance::new(identity("git"));
    let volume = instance.find_or_create_on(&*worker).await.unwrap();
    let container = DefaultFetchContainerCreatorFactory
        .new_fetch_container_creator(Default::default(), vec![], Session::generate(), BuildMetadata::default())
        .create_with_volume("git", volume.clone(), &*worker)
        .await
        .unwrap();

    let spec = ProcessSpec {
        path: GET_SCRIPT.to_string(),
        args: vec![resources_dir("get")],
        stderr: None,
    };
    let err = Resource::new(identity("git"))
        .get(&CancellationToken::new(), &spec, &*container)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::ScriptFailed { exit_status: 128, recoverable: true, .. }));
    assert_eq!(volume.property(labels::INITIALIZED).await.unwrap(), None);
}

/// Cancelling mid-script returns promptly and leaves the cache cold
#[tokio::test]
async fn cancellation_interrupts_running_script() {
    let fixture = Fixture::new();
    fixture.install("git", SLOW_IN);
    let client = fixture.client().await;
    let fetcher = Fetcher::new(client.clone(), Arc::new(MemoryLockFactory::new()), &fast_config());

    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if ready_rx.await.is_ok() {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        }
    });

    let started = Instant::now();
    let err = match fetcher.fetch(request("git"), &cancel, Some(ready_tx)).await {
        Ok(_) => panic!("expected the fetch to be interrupted"),
        Err(e) => e,
    };

    assert!(err.is_interrupted());
    assert!(started.elapsed() < Duration::from_secs(10));

    let worker = client.worker(DEFAULT_WORKER_NAME).unwrap();
    let caches = worker.list_caches().await.unwrap();
    assert_eq!(caches.len(), 1);
    assert!(!caches[0].state.is_initialized());
}

/// Two fetchers sharing a lock directory populate the cache once
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_fetches_run_script_once() {
    let fixture = Fixture::new();
    let scripts = fixture.install("git", &GIT_IN.replace("${FETCH_DELAY:-0}", "0.3"));
    let client = fixture.client().await;

    let lock_dir = fixture.config.lock_dir();
    let one = Fetcher::new(client.clone(), Arc::new(FileLockFactory::new(&lock_dir)), &fast_config());
    let two = Fetcher::new(client.clone(), Arc::new(FileLockFactory::new(&lock_dir)), &fast_config());

    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(
        one.fetch(request("git"), &cancel, None),
        two.fetch(request("git"), &cancel, None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.is_initialized().await.unwrap());
    assert!(b.is_initialized().await.unwrap());
    assert_eq!(a.lock_name().unwrap(), b.lock_name().unwrap());
    assert_eq!(runs(&scripts), 1);

    let worker = client.worker(DEFAULT_WORKER_NAME).unwrap();
    let volume = ResourceCacheInstance::new(identity("git"))
        .find_on(&*worker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        volume.property(labels::INITIALIZED).await.unwrap().as_deref(),
        Some(INITIALIZED_MARKER)
    );
}

/// A type no worker has installed cannot be placed
#[tokio::test]
async fn uninstalled_type_has_no_worker() {
    let fixture = Fixture::new();
    fixture.install("git", GIT_IN);
    let client = fixture.client().await;
    let fetcher = Fetcher::new(client, Arc::new(MemoryLockFactory::new()), &fast_config());

    let err = match fetcher.fetch(request("s3"), &CancellationToken::new(), None).await {
        Ok(_) => panic!("expected no worker for s3"),
        Err(e) => e,
    };
    assert!(matches!(err, FetchError::NoWorkerAvailable { .. }));
    assert!(err.hint().is_some());
}

fn step_request() -> FetchRequest {
    FetchRequest::new(Session::new("step-1"), identity("git"))
}

/// A retried step finds its own container but a failed fetch stays failed
#[tokio::test]
async fn retry_after_failed_fetch_reruns_script() {
    let fixture = Fixture::new();
    fixture.install("git", FAILING_IN);
    let client = fixture.client().await;
    let fetcher = Fetcher::new(client.clone(), Arc::new(MemoryLockFactory::new()), &fast_config());

    for attempt in 0..2 {
        match fetcher.fetch(step_request(), &CancellationToken::new(), None).await {
            Ok(source) => panic!("attempt {attempt} reported {:?}", source.versioned_source()),
            Err(e) => assert!(matches!(e, FetchError::ScriptFailed { exit_status: 128, .. })),
        }
    }

    let worker = client.worker(DEFAULT_WORKER_NAME).unwrap();
    assert!(worker.find_container("step-1").await.is_some());
    let caches = worker.list_caches().await.unwrap();
    assert_eq!(caches.len(), 1);
    assert!(!caches[0].state.is_initialized());
}

/// A retried step reattaches to the result its container already produced
#[tokio::test]
async fn retry_after_successful_fetch_keeps_metadata() {
    let fixture = Fixture::new();
    let scripts = fixture.install("git", GIT_IN);
    let client = fixture.client().await;
    let fetcher = Fetcher::new(client, Arc::new(MemoryLockFactory::new()), &fast_config());

    let first = fetcher.fetch(step_request(), &CancellationToken::new(), None).await.unwrap();
    let second = fetcher.fetch(step_request(), &CancellationToken::new(), None).await.unwrap();

    let versioned = second.versioned_source();
    assert_eq!(versioned, first.versioned_source());
    assert_eq!(versioned.version().get("ref").map(String::as_str), Some("abc"));
    assert_eq!(versioned.metadata()[0].name, "author");
    assert_eq!(versioned.metadata()[0].value, "alice");
    assert_eq!(runs(&scripts), 1);
}
