//! # enginehub Common
//!
//! Shared utilities for the enginehub components.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use enginehub_common::init_logging;
//!
//! init_logging("info")?;
//! tracing::info!(engine = "local-docker", "Engine registered");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, LogFormat};
