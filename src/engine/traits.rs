//! Container engine trait definitions

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use tokio::io::AsyncWrite;

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("{0}")]
    Other(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Container lifecycle state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource limits applied to a container
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    /// Memory limit in bytes
    pub memory: i64,

    /// CPU period in microseconds
    pub cpu_period: i64,

    /// CPU quota in microseconds per period
    pub cpu_quota: i64,
}

impl ResourceLimits {
    /// Limits for one-shot script and terminal containers: 512 MiB, half a core
    pub fn script() -> Self {
        Self {
            memory: 512 * 1024 * 1024,
            cpu_period: 100_000,
            cpu_quota: 50_000,
        }
    }

    /// Limits for long-lived app containers: 1 GiB, one full core
    pub fn app() -> Self {
        Self {
            memory: 1024 * 1024 * 1024,
            cpu_period: 100_000,
            cpu_quota: 100_000,
        }
    }
}

/// Restart policy for a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicyKind {
    #[default]
    No,
    OnFailure {
        max_retries: i64,
    },
}

/// Everything needed to create a container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub command: Option<Vec<String>>,
    pub env: HashMap<String, String>,
    /// Port mappings (container_port -> host_port), TCP
    pub ports: HashMap<u16, u16>,
    pub labels: HashMap<String, String>,
    pub limits: ResourceLimits,
    pub network_mode: String,
    pub restart: RestartPolicyKind,
    pub tty: bool,
    pub stdin_open: bool,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            command: None,
            env: HashMap::new(),
            ports: HashMap::new(),
            labels: HashMap::new(),
            limits: ResourceLimits::script(),
            network_mode: "bridge".to_string(),
            restart: RestartPolicyKind::No,
            tty: false,
            stdin_open: false,
        }
    }
}

/// Container details from an inspect call
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    /// Bound port mappings (container_port -> host_port), TCP
    pub ports: HashMap<u16, u16>,
}

/// Image details from an inspect call
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImageDetails {
    pub image: String,
    pub id: String,
    pub size_bytes: i64,
    pub created: Option<String>,
}

/// Engine disk usage summary
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DiskUsage {
    pub images_count: usize,
    pub images_bytes: i64,
    pub containers_count: usize,
    pub containers_bytes: i64,
    pub volumes_count: usize,
    pub volumes_bytes: i64,
}

/// Result of pruning stopped containers and dangling images
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PruneReport {
    pub containers_removed: usize,
    pub images_removed: usize,
    pub space_reclaimed_bytes: i64,
}

/// Raw duplex byte channel of an attached exec.
///
/// The two halves are owned independently so the reader and writer pumps of a
/// terminal session never share a handle.
pub struct ExecStream {
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    pub output: Pin<Box<dyn Stream<Item = EngineResult<Bytes>> + Send>>,
}

/// Trait abstracting the container daemon API.
///
/// One implementation talks to Docker through bollard; tests use an
/// in-memory fake. Handles are engine container ids (or names where the
/// engine accepts either).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    // ========================================================================
    // Daemon
    // ========================================================================

    /// Check daemon connectivity
    async fn ping(&self) -> EngineResult<()>;

    // ========================================================================
    // Images
    // ========================================================================

    /// Inspect a local image; `None` when not cached locally
    async fn image_status(&self, image: &str) -> EngineResult<Option<ImageDetails>>;

    /// List locally cached (tagged) images
    async fn list_images(&self) -> EngineResult<Vec<ImageDetails>>;

    /// Pull an image from its registry
    async fn pull_image(&self, image: &str) -> EngineResult<()>;

    /// Remove a locally cached image
    async fn remove_image(&self, image: &str, force: bool) -> EngineResult<()>;

    /// Engine disk usage (df)
    async fn disk_usage(&self) -> EngineResult<DiskUsage>;

    /// Prune stopped containers and dangling images
    async fn prune(&self) -> EngineResult<PruneReport>;

    // ========================================================================
    // Containers
    // ========================================================================

    /// Create a container; returns the engine handle
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String>;

    async fn start_container(&self, id: &str) -> EngineResult<()>;

    async fn stop_container(&self, id: &str, grace_secs: i64) -> EngineResult<()>;

    async fn restart_container(&self, id: &str, grace_secs: i64) -> EngineResult<()>;

    async fn kill_container(&self, id: &str) -> EngineResult<()>;

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()>;

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails>;

    /// Block until the container exits; returns the exit code
    async fn wait_container(&self, id: &str) -> EngineResult<i64>;

    /// Collect finished container logs, lossily decoded.
    ///
    /// `stdout`/`stderr` select which stream(s) to include.
    async fn container_logs(&self, id: &str, stdout: bool, stderr: bool) -> EngineResult<String>;

    // ========================================================================
    // Exec
    // ========================================================================

    /// Create an interactive exec in a running container
    async fn create_exec(&self, container_id: &str, cmd: Vec<String>) -> EngineResult<String>;

    /// Start a previously created exec and attach to its byte streams
    async fn start_exec(&self, exec_id: &str) -> EngineResult<ExecStream>;

    /// Resize the exec's TTY
    async fn resize_exec(&self, exec_id: &str, rows: u16, cols: u16) -> EngineResult<()>;
}
