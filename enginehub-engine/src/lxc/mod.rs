//! LXC system container backend.
//!
//! Two transports behind one adapter, picked once at construction:
//!
//! - **Local**: drives the `lxc` command line tool on this host.
//! - **Remote**: talks to an LXD daemon's REST API (`/1.0/...`).
//!
//! System containers have no entrypoint, so `command`, `working_dir` and
//! `user` from a [`WorkloadSpec`](crate::WorkloadSpec) are ignored with a
//! warning, and Dockerfile builds are unsupported.

mod backend;
mod local;
mod remote;
mod translate;

pub use backend::LxcEngine;

/// LXD address used in remote mode when no host is configured.
pub const DEFAULT_LXD_URL: &str = "http://localhost:8443";

/// LXD HTTPS port appended to bare hosts.
pub const DEFAULT_LXD_PORT: u16 = 8443;

/// Simplestreams server images are pulled from.
pub const IMAGE_SERVER: &str = "https://images.linuxcontainers.org";
