//! Docker Engine API backend.
//!
//! Talks to a local or remote Docker daemon through `bollard`. The client is
//! created once at registration and reused for every call.

mod backend;

pub use backend::DockerEngine;

/// Default port of an unencrypted remote Docker daemon.
pub const DEFAULT_DOCKER_PORT: u16 = 2375;
