//! Podman libpod REST API backend.
//!
//! One HTTP request per operation against `{host}/{api_version}/libpod`.
//! Podman must expose its API over TCP (`podman system service tcp:0.0.0.0:8080`).

mod backend;

pub use backend::PodmanEngine;

/// Address used when no host is configured.
pub const DEFAULT_PODMAN_URL: &str = "http://localhost:8080";
