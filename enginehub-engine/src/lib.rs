//! # enginehub Engine
//!
//! Container engine abstraction layer for managing workloads across
//! heterogeneous backends.
//!
//! This crate provides a unified interface for different container backends:
//! - **Docker** - Docker Engine API over the local socket or TCP
//! - **Podman** - libpod REST API
//! - **LXC** - local `lxc` command line tool or a remote LXD REST API
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             EngineManager               │
//! │  (register, route, aggregate, health)   │
//! └─────────────────────┬───────────────────┘
//!                       │ Arc<dyn ContainerEngine>
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │ DockerEngine │ │ PodmanEngine │ │  LxcEngine   │
//! │  (bollard)   │ │  (reqwest)   │ │ (cli / REST) │
//! └──────────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enginehub_engine::{EngineKind, EngineManager, EngineOptions, EngineTarget, WorkloadSpec};
//!
//! #[tokio::main]
//! async fn main() -> enginehub_engine::Result<()> {
//!     let manager = EngineManager::new();
//!     manager
//!         .register("local", EngineKind::Docker, EngineTarget::local(), &EngineOptions::default())
//!         .await?;
//!
//!     let spec = WorkloadSpec::new("web", "nginx:1.25")
//!         .with_port("80/tcp", "8080")
//!         .with_memory_limit("512MB");
//!
//!     let id = manager.create_workload(&spec, None).await?;
//!     manager.start_workload(&id, None).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod traits;
pub mod types;
pub mod units;
pub mod normalize;
pub mod mock;
pub mod docker;
pub mod podman;
pub mod lxc;
pub mod manager;
pub mod health;
mod archive;

pub use error::{EngineError, Result};
pub use traits::ContainerEngine;
pub use types::*;
pub use mock::MockEngine;
pub use docker::DockerEngine;
pub use podman::PodmanEngine;
pub use lxc::LxcEngine;
pub use manager::{
    build_adapter,
    EngineManager,
    EngineRegistration,
    EngineState,
    EngineSummary,
    DEFAULT_STOP_TIMEOUT,
};
pub use health::{HealthMonitor, DEFAULT_HEALTH_INTERVAL};
