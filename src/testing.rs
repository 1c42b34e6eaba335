//! Recording test doubles for the worker traits

use crate::cache::labels;
use crate::error::{FetchError, FetchResult};
use crate::resource::{Labels, ResourceTypes, VersionResult};
use crate::session::Session;
use crate::worker::{
    Container, ContainerSpec, LineSink, Runner, Volume, VolumeMount, VolumeSpec, Worker, WorkerClient,
    WorkerSpec,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a fake script does when run
#[derive(Clone)]
pub enum RunnerBehavior {
    Succeed(VersionResult),
    Fail(fn() -> FetchError),
    /// Never finishes, even when cancelled
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub args: Vec<String>,
    pub input: Vec<u8>,
    pub had_stderr: bool,
    pub recoverable: bool,
}

pub struct FakeRunner {
    behavior: RunnerBehavior,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeRunner {
    pub fn new(behavior: RunnerBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(result: VersionResult) -> Self {
        Self::new(RunnerBehavior::Succeed(result))
    }

    pub fn failing(error: fn() -> FetchError) -> Self {
        Self::new(RunnerBehavior::Fail(error))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run_script(
        &self,
        _cancel: &CancellationToken,
        path: &str,
        args: &[String],
        input: &[u8],
        output: &mut VersionResult,
        stderr: Option<LineSink>,
        recoverable: bool,
    ) -> FetchResult<()> {
        self.calls.lock().unwrap().push(RecordedCall {
            path: path.to_string(),
            args: args.to_vec(),
            input: input.to_vec(),
            had_stderr: stderr.is_some(),
            recoverable,
        });

        match &self.behavior {
            RunnerBehavior::Succeed(result) => {
                *output = result.clone();
                Ok(())
            }
            RunnerBehavior::Fail(error) => Err(error()),
            RunnerBehavior::Hang => std::future::pending().await,
        }
    }
}

pub struct FakeVolume {
    handle: String,
    labels: Labels,
    properties: Mutex<BTreeMap<String, String>>,
    releases: Mutex<Vec<Option<Duration>>>,
}

impl FakeVolume {
    pub fn new(handle: &str) -> Self {
        Self::with_labels(handle, Labels::new())
    }

    pub fn with_labels(handle: &str, labels: Labels) -> Self {
        Self {
            handle: handle.to_string(),
            labels,
            properties: Mutex::new(BTreeMap::new()),
            releases: Mutex::new(Vec::new()),
        }
    }

    /// Mark as already populated
    pub fn initialized(self) -> Self {
        self.properties.lock().unwrap().insert(
            labels::INITIALIZED.to_string(),
            crate::cache::INITIALIZED_MARKER.to_string(),
        );
        self
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn property_value(&self, name: &str) -> Option<String> {
        self.properties.lock().unwrap().get(name).cloned()
    }

    pub fn releases(&self) -> Vec<Option<Duration>> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl Volume for FakeVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn property(&self, name: &str) -> FetchResult<Option<String>> {
        Ok(self.property_value(name))
    }

    async fn set_property(&self, name: &str, value: &str) -> FetchResult<()> {
        self.properties
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn release(&self, ttl: Option<Duration>) -> FetchResult<()> {
        self.releases.lock().unwrap().push(ttl);
        Ok(())
    }
}

pub struct FakeContainer {
    handle: String,
    worker_name: String,
    mounts: Vec<VolumeMount>,
    runner: FakeRunner,
    releases: Mutex<Vec<Option<Duration>>>,
}

impl FakeContainer {
    pub fn new(handle: &str, worker_name: &str, mounts: Vec<VolumeMount>, runner: FakeRunner) -> Self {
        Self {
            handle: handle.to_string(),
            worker_name: worker_name.to_string(),
            mounts,
            runner,
            releases: Mutex::new(Vec::new()),
        }
    }

    pub fn runner(&self) -> &FakeRunner {
        &self.runner
    }

    pub fn releases(&self) -> Vec<Option<Duration>> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runner for FakeContainer {
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
        self.runner
            .run_script(cancel, path, args, input, output, stderr, recoverable)
            .await
    }
}

#[async_trait]
impl Container for FakeContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn worker_name(&self) -> &str {
        &self.worker_name
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.mounts.clone()
    }

    async fn release(&self, ttl: Option<Duration>) -> FetchResult<()> {
        self.releases.lock().unwrap().push(ttl);
        Ok(())
    }
}

pub struct FakeWorker {
    name: String,
    runner: RunnerBehavior,
    fail_container_creation: bool,
    fail_volume_lookup: bool,
    volumes: Mutex<Vec<(String, Arc<FakeVolume>)>>,
    volume_specs: Mutex<Vec<VolumeSpec>>,
    created: Mutex<Vec<(Session, ContainerSpec)>>,
    containers: Mutex<Vec<Arc<FakeContainer>>>,
}

impl FakeWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            runner: RunnerBehavior::Succeed(VersionResult::default()),
            fail_container_creation: false,
            fail_volume_lookup: false,
            volumes: Mutex::new(Vec::new()),
            volume_specs: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            containers: Mutex::new(Vec::new()),
        }
    }

    /// Behavior of the get script in containers created from now on
    pub fn with_runner(mut self, behavior: RunnerBehavior) -> Self {
        self.runner = behavior;
        self
    }

    pub fn failing_container_creation(mut self) -> Self {
        self.fail_container_creation = true;
        self
    }

    pub fn failing_volume_lookup(mut self) -> Self {
        self.fail_volume_lookup = true;
        self
    }

    pub fn volume_specs(&self) -> Vec<VolumeSpec> {
        self.volume_specs.lock().unwrap().clone()
    }

    pub fn created_containers(&self) -> Vec<(Session, ContainerSpec)> {
        self.created.lock().unwrap().clone()
    }

    pub fn containers(&self) -> Vec<Arc<FakeContainer>> {
        self.containers.lock().unwrap().clone()
    }

    pub fn volumes(&self) -> Vec<Arc<FakeVolume>> {
        self.volumes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, volume)| volume.clone())
            .collect()
    }

    /// Scripts run across every container of this worker
    pub fn script_calls(&self) -> usize {
        self.containers()
            .iter()
            .map(|container| container.runner().calls().len())
            .sum()
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_container(
        &self,
        session: &Session,
        spec: ContainerSpec,
        _resource_types: &ResourceTypes,
    ) -> FetchResult<Arc<dyn Container>> {
        if self.fail_container_creation {
            return Err(FetchError::container_creation(&self.name, "image pull failed"));
        }

        let mut containers = self.containers.lock().unwrap();
        let container = Arc::new(FakeContainer::new(
            &format!("container-{}", containers.len() + 1),
            &self.name,
            spec.outputs.clone(),
            FakeRunner::new(self.runner.clone()),
        ));
        containers.push(container.clone());
        self.created.lock().unwrap().push((session.clone(), spec));
        Ok(container as Arc<dyn Container>)
    }

    async fn find_volume(&self, wanted: &Labels) -> FetchResult<Option<Arc<dyn Volume>>> {
        if self.fail_volume_lookup {
            return Err(FetchError::cache_lookup(&self.name, "volume listing failed"));
        }

        let volumes = self.volumes.lock().unwrap();
        let found = volumes.iter().find(|(_, volume)| {
            wanted
                .iter()
                .all(|(key, value)| volume.labels().get(key) == Some(value))
        });
        Ok(found.map(|(_, volume)| volume.clone() as Arc<dyn Volume>))
    }

    async fn find_or_create_volume(&self, spec: VolumeSpec) -> FetchResult<Arc<dyn Volume>> {
        if self.fail_volume_lookup {
            return Err(FetchError::cache_lookup(&self.name, "volume creation failed"));
        }
        self.volume_specs.lock().unwrap().push(spec.clone());

        let mut volumes = self.volumes.lock().unwrap();
        if let Some((_, volume)) = volumes.iter().find(|(key, _)| *key == spec.key) {
            return Ok(volume.clone() as Arc<dyn Volume>);
        }
        let volume = Arc::new(FakeVolume::with_labels(
            &format!("volume-{}", volumes.len() + 1),
            spec.labels,
        ));
        volumes.push((spec.key, volume.clone()));
        Ok(volume as Arc<dyn Volume>)
    }
}

pub struct FakeWorkerClient {
    workers: Vec<Arc<FakeWorker>>,
    containers: HashMap<String, Arc<FakeContainer>>,
    fail_container_lookup: bool,
    satisfying_calls: AtomicUsize,
}

impl FakeWorkerClient {
    pub fn new(workers: Vec<Arc<FakeWorker>>) -> Self {
        Self {
            workers,
            containers: HashMap::new(),
            fail_container_lookup: false,
            satisfying_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_container(mut self, session_id: &str, container: Arc<FakeContainer>) -> Self {
        self.containers.insert(session_id.to_string(), container);
        self
    }

    pub fn failing_container_lookup(mut self) -> Self {
        self.fail_container_lookup = true;
        self
    }

    pub fn satisfying_calls(&self) -> usize {
        self.satisfying_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerClient for FakeWorkerClient {
    async fn find_container_for_identifier(
        &self,
        session_id: &str,
    ) -> FetchResult<Option<Arc<dyn Container>>> {
        if self.fail_container_lookup {
            return Err(FetchError::ContainerLookup {
                session: session_id.to_string(),
                reason: "worker unreachable".to_string(),
            });
        }
        Ok(self
            .containers
            .get(session_id)
            .map(|container| container.clone() as Arc<dyn Container>))
    }

    async fn satisfying(
        &self,
        spec: &WorkerSpec,
        _resource_types: &ResourceTypes,
    ) -> FetchResult<Arc<dyn Worker>> {
        self.satisfying_calls.fetch_add(1, Ordering::SeqCst);
        match self.workers.first() {
            Some(worker) => Ok(worker.clone() as Arc<dyn Worker>),
            None => Err(FetchError::NoWorkerAvailable {
                resource_type: spec.resource_type.clone(),
                tags: spec.tags.clone(),
                team_id: spec.team_id,
            }),
        }
    }
}
