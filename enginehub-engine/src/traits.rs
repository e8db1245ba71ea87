//! Core container engine abstraction trait.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::error;

use crate::error::Result;
use crate::types::*;

/// Core container engine abstraction trait.
///
/// Every backend adapter implements the whole surface. Return types encode
/// the failure policy:
///
/// - `Result` for the probe, creation, inspect, build, commit, network
///   creation and system queries. These need operator attention and are
///   surfaced to the caller as typed errors.
/// - `bool`, `Vec` or `String` for lifecycle, listing, logs and network
///   membership. Failures are logged inside the adapter and reported as
///   `false`/empty so batch and background callers keep going.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    // =========================================================================
    // Identity & Health
    // =========================================================================

    /// Backend kind of this adapter.
    fn kind(&self) -> EngineKind;

    /// Connectivity probe. Side-effect free and safe to call repeatedly.
    async fn ping(&self) -> Result<()>;

    // =========================================================================
    // Workload Lifecycle
    // =========================================================================

    /// Create a workload (does not start it). Returns the backend id.
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<String>;

    /// Start a workload.
    async fn start_workload(&self, id: &str) -> bool;

    /// Stop a workload, giving it `timeout` to exit before it is killed.
    async fn stop_workload(&self, id: &str, timeout: Duration) -> bool;

    /// Restart a workload.
    async fn restart_workload(&self, id: &str, timeout: Duration) -> bool;

    /// Remove a workload. `force` removes it even while running.
    async fn remove_workload(&self, id: &str, force: bool) -> bool;

    // =========================================================================
    // Workload Status
    // =========================================================================

    /// Inspect a workload.
    ///
    /// Unknown ids yield `EngineError::WorkloadNotFound`. A response that
    /// cannot be translated yields a degraded snapshot, not an error.
    async fn inspect_workload(&self, id: &str) -> Result<WorkloadSnapshot>;

    /// List workloads; only running ones unless `all`.
    async fn list_workloads(&self, all: bool) -> Vec<WorkloadSnapshot>;

    /// Last `tail` lines of a workload's log.
    async fn workload_logs(&self, id: &str, tail: usize) -> String;

    /// Run a one-shot command and collect its combined output.
    async fn exec(&self, id: &str, command: &str) -> ExecResult;

    // =========================================================================
    // Images
    // =========================================================================

    /// Pull `image:tag`.
    async fn pull_image(&self, image: &str, tag: &str) -> bool;

    /// List local images.
    async fn list_images(&self) -> Vec<ImageSnapshot>;

    /// Remove an image.
    async fn remove_image(&self, id: &str, force: bool) -> bool;

    /// Build an image from a context directory.
    ///
    /// Backends without Dockerfile builds return `EngineError::Unsupported`.
    async fn build_image(&self, request: &BuildRequest) -> Result<()>;

    /// Save a workload's filesystem as `repository:tag`. Returns the image reference.
    async fn commit_workload(&self, id: &str, repository: &str, tag: &str) -> Result<String>;

    // =========================================================================
    // Networks
    // =========================================================================

    /// Create a network. Returns its id.
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String>;

    /// List networks.
    async fn list_networks(&self) -> Vec<NetworkSnapshot>;

    /// Remove a network.
    async fn remove_network(&self, id: &str) -> bool;

    /// Attach a workload to a network.
    async fn connect_network(&self, workload: &str, network: &str) -> bool;

    /// Detach a workload from a network.
    async fn disconnect_network(&self, workload: &str, network: &str) -> bool;

    // =========================================================================
    // System
    // =========================================================================

    /// Backend system information, as reported by the backend.
    async fn system_info(&self) -> Result<Value>;

    /// Backend version information.
    async fn version(&self) -> Result<Value>;
}

/// Fold a failed soft operation into its default value, logging the error.
///
/// Used by the adapters for the bool/empty half of the failure policy.
pub(crate) fn caught<T: Default>(kind: EngineKind, operation: &str, target: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!(
                engine = %kind,
                operation = %operation,
                target = %target,
                error = %e,
                "Engine operation failed"
            );
            T::default()
        }
    }
}

/// Exec variant of [`caught`]: failures become exit code -1 carrying the error.
pub(crate) fn caught_exec(kind: EngineKind, id: &str, result: Result<ExecResult>) -> ExecResult {
    result.unwrap_or_else(|e| {
        error!(engine = %kind, operation = "exec", target = %id, error = %e, "Engine operation failed");
        ExecResult::failed(e.to_string())
    })
}
