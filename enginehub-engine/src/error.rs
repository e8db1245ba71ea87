//! Error types for the container engine abstraction layer.

use thiserror::Error;

/// Errors that can occur during container engine operations.
///
/// Backend-native errors (`bollard`, `reqwest`, subprocess I/O) never leave an
/// adapter; they are folded into one of these variants together with the
/// engine name and the operation that failed.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine could not be reached or did not answer the probe.
    #[error("Failed to connect to {engine} engine: {reason}")]
    Connectivity { engine: String, reason: String },

    /// The backend has no equivalent for the requested operation.
    #[error("Operation '{operation}' is not supported by the {engine} engine")]
    Unsupported { engine: String, operation: String },

    /// The workload spec cannot be expressed in the backend's terms.
    #[error("Cannot translate request for {engine} engine: {reason}")]
    Translation { engine: String, reason: String },

    /// A backend call failed while performing an operation.
    #[error("{engine} engine failed during {operation}: {reason}")]
    BackendCall {
        engine: String,
        operation: String,
        reason: String,
    },

    /// Creation stopped part way; the workload exists but is only partially configured.
    #[error("Workload {workload} on {engine} was created but {} configuration step(s) failed: {}", failed_steps.len(), failed_steps.join("; "))]
    PartiallyApplied {
        engine: String,
        workload: String,
        failed_steps: Vec<String>,
    },

    /// No engine is registered under this name (or no default is set).
    #[error("Engine not found: {0}")]
    EngineNotFound(String),

    /// The engine does not know this workload id.
    #[error("Workload {id} not found on {engine} engine")]
    WorkloadNotFound { engine: String, id: String },

    /// An engine with this name is already registered.
    #[error("Engine already registered: {0}")]
    DuplicateEngine(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn connectivity(engine: &str, reason: impl ToString) -> Self {
        Self::Connectivity {
            engine: engine.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unsupported(engine: &str, operation: &str) -> Self {
        Self::Unsupported {
            engine: engine.to_string(),
            operation: operation.to_string(),
        }
    }

    pub(crate) fn translation(engine: &str, reason: impl ToString) -> Self {
        Self::Translation {
            engine: engine.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn backend(engine: &str, operation: &str, reason: impl ToString) -> Self {
        Self::BackendCall {
            engine: engine.to_string(),
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn workload_not_found(engine: &str, id: &str) -> Self {
        Self::WorkloadNotFound {
            engine: engine.to_string(),
            id: id.to_string(),
        }
    }

    /// True for both unknown engines and unknown workloads.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EngineNotFound(_) | Self::WorkloadNotFound { .. })
    }

    /// True when the failure came from the target being unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
