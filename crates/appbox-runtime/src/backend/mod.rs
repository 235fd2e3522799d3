//! Container backend abstraction for platform-agnostic operation.

pub mod memory;
pub mod native;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use appbox_common::config::{AppboxConfig, BackendKind};
use appbox_common::error::Result;
use appbox_common::types::{ContainerId, ContainerState};
use chrono::{DateTime, Utc};

use crate::exec::{Attached, ExecConfig, ExecInspect};
use crate::metrics::MetricsSnapshot;

/// Configuration for creating a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Human-readable container name, unique per backend.
    pub name: String,
    /// Labels used to find the container again.
    pub labels: BTreeMap<String, String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Command run when the container starts; empty runs nothing.
    pub command: Vec<String>,
    /// Cgroup parameters overriding the host defaults.
    pub limits: BTreeMap<String, String>,
}

/// Information about a tracked container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Unique identifier.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Labels the container was created with.
    pub labels: BTreeMap<String, String>,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Loopback address of the container.
    pub ip: Option<Ipv4Addr>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last start, if running.
    pub started_at: Option<DateTime<Utc>>,
}

impl ContainerInfo {
    /// Value of a label.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Conjunction of label constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    equals: Vec<(String, String)>,
    absent: Vec<String>,
}

impl LabelFilter {
    /// A filter matching every container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `key` to be set to `value`.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.equals.push((key.to_string(), value.to_string()));
        self
    }

    /// Requires `key` to be unset.
    #[must_use]
    pub fn without(mut self, key: &str) -> Self {
        self.absent.push(key.to_string());
        self
    }

    /// Returns `true` if `labels` satisfy every constraint.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
            && self.absent.iter().all(|k| !labels.contains_key(k))
    }
}

/// Platform-agnostic container backend.
///
/// Implementors handle the platform-specific details of container
/// creation, execution, and teardown.
pub trait ContainerBackend: Send + Sync {
    /// Creates a container from the given specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created; nothing is
    /// left behind in that case.
    fn create(&self, spec: &ContainerSpec) -> Result<ContainerInfo>;

    /// Starts a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or cannot be started.
    fn start(&self, id: &ContainerId) -> Result<()>;

    /// Stops a container, giving its processes `timeout` to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or cannot be stopped.
    fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()>;

    /// Removes a container and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or its state cannot
    /// be updated.
    fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Current information about one container.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::NotFound`](appbox_common::error::AppboxError::NotFound)
    /// for an unknown id.
    fn inspect(&self, id: &ContainerId) -> Result<ContainerInfo>;

    /// Lists the containers whose labels match `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot retrieve state.
    fn list(&self, filter: &LabelFilter) -> Result<Vec<ContainerInfo>>;

    /// Registers a command to run in a container and returns its exec id.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or the command is empty.
    fn exec_create(&self, id: &ContainerId, config: &ExecConfig) -> Result<String>;

    /// Spawns a registered command and connects to its streams.
    ///
    /// # Errors
    ///
    /// Returns an error if the exec id is unknown or the process cannot
    /// be spawned.
    fn exec_attach(&self, exec_id: &str) -> Result<Attached>;

    /// State of a registered command.
    ///
    /// # Errors
    ///
    /// Returns an error if the exec id is unknown.
    fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect>;

    /// Resource usage of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or its counters cannot
    /// be read.
    fn stats(&self, id: &ContainerId) -> Result<MetricsSnapshot>;

    /// Sets (`Some`) or removes (`None`) a container environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or the name is invalid.
    fn update_env(&self, id: &ContainerId, key: &str, value: Option<&str>) -> Result<()>;

    /// Returns whether this backend is operational on the current platform.
    fn is_available(&self) -> bool;

    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Creates the backend selected by the configuration.
///
/// # Errors
///
/// Returns an error if the native backend is selected on an unsupported
/// platform.
pub fn detect_backend(config: &AppboxConfig) -> Result<Arc<dyn ContainerBackend>> {
    let backend: Arc<dyn ContainerBackend> = match config.backend {
        BackendKind::Native => Arc::new(native::NativeBackend::new(config)?),
        BackendKind::Memory => Arc::new(memory::MemoryBackend::new(&config.data_dir.join("memory"))),
    };
    tracing::info!(backend = backend.name(), "container backend selected");
    Ok(backend)
}
