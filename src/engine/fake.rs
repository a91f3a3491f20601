//! In-memory engine used by unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::traits::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerState, DiskUsage, EngineError,
    EngineResult, ExecStream, ImageDetails, PruneReport,
};

/// Scripted outcome for the next created container
#[derive(Debug, Clone)]
pub struct FakeRun {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// When set, `wait_container` never resolves (drives timeout paths)
    pub hang: bool,
}

impl Default for FakeRun {
    fn default() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            hang: false,
        }
    }
}

impl FakeRun {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn stdout(mut self, out: impl Into<String>) -> Self {
        self.stdout = out.into();
        self
    }

    pub fn stderr(mut self, err: impl Into<String>) -> Self {
        self.stderr = err.into();
        self
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

struct FakeContainer {
    id: String,
    name: Option<String>,
    spec: ContainerSpec,
    state: ContainerState,
    outcome: FakeRun,
}

/// Engine double backed by plain maps.
///
/// Containers run scripted outcomes queued with [`FakeEngine::plan`]; execs
/// echo whatever is written to them, which is enough to drive a terminal
/// session end to end.
pub struct FakeEngine {
    containers: Mutex<HashMap<String, FakeContainer>>,
    /// Locally cached images
    images: Mutex<HashSet<String>>,
    /// Images available for pull
    registry: Mutex<HashSet<String>>,
    planned: Mutex<VecDeque<FakeRun>>,
    last_spec: Mutex<Option<ContainerSpec>>,
    created_total: AtomicUsize,
    next_id: AtomicU64,
    pull_count: AtomicUsize,
    pull_delay: Mutex<Option<Duration>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashSet::new()),
            registry: Mutex::new(HashSet::new()),
            planned: Mutex::new(VecDeque::new()),
            last_spec: Mutex::new(None),
            created_total: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            pull_count: AtomicUsize::new(0),
            pull_delay: Mutex::new(None),
        }
    }

    pub fn with_images(images: &[&str]) -> Self {
        let engine = Self::new();
        for image in images {
            engine.add_image(image);
        }
        engine
    }

    pub fn add_image(&self, image: &str) {
        self.images.lock().insert(image.to_string());
    }

    pub fn add_registry_image(&self, image: &str) {
        self.registry.lock().insert(image.to_string());
    }

    pub fn set_pull_delay(&self, delay: Duration) {
        *self.pull_delay.lock() = Some(delay);
    }

    pub fn pull_count(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    pub fn plan(&self, run: FakeRun) {
        self.planned.lock().push_back(run);
    }

    /// Spec of the most recently created container (survives removal)
    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.last_spec.lock().clone()
    }

    /// Total containers ever created (survives removal)
    pub fn created_total(&self) -> usize {
        self.created_total.load(Ordering::SeqCst)
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().len()
    }

    pub fn container_state(&self, handle: &str) -> Option<ContainerState> {
        let containers = self.containers.lock();
        Self::resolve(&containers, handle).map(|c| c.state)
    }

    pub fn container_spec(&self, handle: &str) -> Option<ContainerSpec> {
        let containers = self.containers.lock();
        Self::resolve(&containers, handle).map(|c| c.spec.clone())
    }

    pub fn set_state(&self, handle: &str, state: ContainerState) {
        let mut containers = self.containers.lock();
        if let Some(id) = Self::resolve(&containers, handle).map(|c| c.id.clone()) {
            if let Some(container) = containers.get_mut(&id) {
                container.state = state;
            }
        }
    }

    /// Drop a container behind the orchestrator's back (simulates an
    /// out-of-band `docker rm`)
    pub fn vanish(&self, handle: &str) {
        let mut containers = self.containers.lock();
        if let Some(id) = Self::resolve(&containers, handle).map(|c| c.id.clone()) {
            containers.remove(&id);
        }
    }

    fn resolve<'a>(
        containers: &'a HashMap<String, FakeContainer>,
        handle: &str,
    ) -> Option<&'a FakeContainer> {
        containers
            .get(handle)
            .or_else(|| containers.values().find(|c| c.name.as_deref() == Some(handle)))
    }

    fn resolve_id(&self, handle: &str) -> EngineResult<String> {
        let containers = self.containers.lock();
        Self::resolve(&containers, handle)
            .map(|c| c.id.clone())
            .ok_or_else(|| EngineError::ContainerNotFound(handle.to_string()))
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn image_status(&self, image: &str) -> EngineResult<Option<ImageDetails>> {
        if self.images.lock().contains(image) {
            Ok(Some(ImageDetails {
                image: image.to_string(),
                id: format!("sha256:{}", image.len()),
                size_bytes: 1024 * 1024,
                created: None,
            }))
        } else {
            Ok(None)
        }
    }

    async fn list_images(&self) -> EngineResult<Vec<ImageDetails>> {
        let images = self.images.lock().iter().cloned().collect::<Vec<_>>();
        let mut result = Vec::new();
        for image in images {
            if let Some(details) = self.image_status(&image).await? {
                result.push(details);
            }
        }
        Ok(result)
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        let delay = *self.pull_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.registry.lock().contains(image) {
            return Err(EngineError::ImageNotFound(image.to_string()));
        }

        self.pull_count.fetch_add(1, Ordering::SeqCst);
        self.images.lock().insert(image.to_string());
        Ok(())
    }

    async fn remove_image(&self, image: &str, _force: bool) -> EngineResult<()> {
        if self.images.lock().remove(image) {
            Ok(())
        } else {
            Err(EngineError::ImageNotFound(image.to_string()))
        }
    }

    async fn disk_usage(&self) -> EngineResult<DiskUsage> {
        Ok(DiskUsage {
            images_count: self.images.lock().len(),
            containers_count: self.containers.lock().len(),
            ..Default::default()
        })
    }

    async fn prune(&self) -> EngineResult<PruneReport> {
        let mut containers = self.containers.lock();
        let before = containers.len();
        containers.retain(|_, c| c.state == ContainerState::Running);

        Ok(PruneReport {
            containers_removed: before - containers.len(),
            ..Default::default()
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        if !self.images.lock().contains(&spec.image) {
            return Err(EngineError::ImageNotFound(spec.image.clone()));
        }

        let mut containers = self.containers.lock();

        if let Some(name) = &spec.name {
            if containers.values().any(|c| c.name.as_deref() == Some(name)) {
                return Err(EngineError::ContainerExists(name.clone()));
            }
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let outcome = self.planned.lock().pop_front().unwrap_or_default();
        *self.last_spec.lock() = Some(spec.clone());
        self.created_total.fetch_add(1, Ordering::SeqCst);

        containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: spec.name.clone(),
                spec: spec.clone(),
                state: ContainerState::Created,
                outcome,
            },
        );

        Ok(id)
    }

    async fn start_container(&self, handle: &str) -> EngineResult<()> {
        let id = self.resolve_id(handle)?;
        let mut containers = self.containers.lock();
        if let Some(container) = containers.get_mut(&id) {
            container.state = ContainerState::Running;
        }
        Ok(())
    }

    async fn stop_container(&self, handle: &str, _grace_secs: i64) -> EngineResult<()> {
        let id = self.resolve_id(handle)?;
        let mut containers = self.containers.lock();
        if let Some(container) = containers.get_mut(&id) {
            container.state = ContainerState::Exited;
        }
        Ok(())
    }

    async fn restart_container(&self, handle: &str, _grace_secs: i64) -> EngineResult<()> {
        let id = self.resolve_id(handle)?;
        let mut containers = self.containers.lock();
        if let Some(container) = containers.get_mut(&id) {
            container.state = ContainerState::Running;
        }
        Ok(())
    }

    async fn kill_container(&self, handle: &str) -> EngineResult<()> {
        let id = self.resolve_id(handle)?;
        let mut containers = self.containers.lock();
        if let Some(container) = containers.get_mut(&id) {
            container.state = ContainerState::Exited;
        }
        Ok(())
    }

    async fn remove_container(&self, handle: &str, _force: bool) -> EngineResult<()> {
        let id = self.resolve_id(handle)?;
        self.containers.lock().remove(&id);
        Ok(())
    }

    async fn inspect_container(&self, handle: &str) -> EngineResult<ContainerDetails> {
        let containers = self.containers.lock();
        let container = Self::resolve(&containers, handle)
            .ok_or_else(|| EngineError::ContainerNotFound(handle.to_string()))?;

        Ok(ContainerDetails {
            id: container.id.clone(),
            name: container.name.clone().unwrap_or_default(),
            state: container.state,
            ports: container.spec.ports.clone(),
        })
    }

    async fn wait_container(&self, handle: &str) -> EngineResult<i64> {
        let id = self.resolve_id(handle)?;

        let (hang, exit_code) = {
            let containers = self.containers.lock();
            let container = containers
                .get(&id)
                .ok_or_else(|| EngineError::ContainerNotFound(id.clone()))?;
            (container.outcome.hang, container.outcome.exit_code)
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let mut containers = self.containers.lock();
        if let Some(container) = containers.get_mut(&id) {
            container.state = ContainerState::Exited;
        }

        Ok(exit_code)
    }

    async fn container_logs(&self, handle: &str, stdout: bool, stderr: bool) -> EngineResult<String> {
        let id = self.resolve_id(handle)?;
        let containers = self.containers.lock();
        let container = containers
            .get(&id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.clone()))?;

        let mut collected = String::new();
        if stdout {
            collected.push_str(&container.outcome.stdout);
        }
        if stderr {
            collected.push_str(&container.outcome.stderr);
        }

        Ok(collected)
    }

    async fn create_exec(&self, container_id: &str, _cmd: Vec<String>) -> EngineResult<String> {
        let id = self.resolve_id(container_id)?;
        Ok(format!("exec-{}", id))
    }

    async fn start_exec(&self, _exec_id: &str) -> EngineResult<ExecStream> {
        let (input, mut echo) = tokio::io::duplex(4096);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match echo.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(ExecStream {
            input: Box::pin(input),
            output: Box::pin(UnboundedReceiverStream::new(rx).map(Ok)),
        })
    }

    async fn resize_exec(&self, _exec_id: &str, _rows: u16, _cols: u16) -> EngineResult<()> {
        Ok(())
    }
}
