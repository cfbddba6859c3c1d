//! The worker pool capability used by the controller.

use std::future::Future;

use crate::error::BackendResult;

/// Host port → instance port forwarding for a new worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Everything the backend needs to start one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Image or template the instance is created from.
    pub template: String,
    /// Instance name; the controller uses the worker id.
    pub name: String,
    pub memory_limit_bytes: u64,
    /// Command override, `None` for the template's default.
    pub command: Option<String>,
    pub ports: Vec<PortMapping>,
}

/// Handle to a running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInstance {
    pub name: String,
    /// Backend-assigned identifier, may be empty if the backend has none.
    pub id: String,
}

/// Creates, removes and lists named worker instances.
///
/// Calls are awaited one at a time by the controller; implementations
/// do not need to be reentrant.
pub trait WorkerPoolBackend: Send + Sync {
    /// Start a new instance. Fails with `AlreadyExists` on a name clash.
    fn create(&self, spec: &WorkerSpec) -> impl Future<Output = BackendResult<WorkerInstance>> + Send;

    /// Destroy an instance. Fails with `NotFound` if there is none.
    fn remove(&self, name: &str) -> impl Future<Output = BackendResult<()>> + Send;

    /// Whether an instance with this name exists, running or stopped.
    fn exists(&self, name: &str) -> impl Future<Output = BackendResult<bool>> + Send;

    /// All instances currently running on the backend.
    fn list_active(&self) -> impl Future<Output = BackendResult<Vec<WorkerInstance>>> + Send;
}
