//! Build context packaging.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Tar a build context directory into memory.
///
/// Runs on the blocking pool; contexts can be large.
pub async fn tar_build_context(engine: &str, context: &Path, dockerfile: &str) -> Result<Vec<u8>> {
    if !context.is_dir() {
        return Err(EngineError::InvalidConfig(format!(
            "build context {} is not a directory",
            context.display()
        )));
    }
    if !context.join(dockerfile).is_file() {
        return Err(EngineError::InvalidConfig(format!(
            "{} not found in build context {}",
            dockerfile,
            context.display()
        )));
    }

    let context: PathBuf = context.to_path_buf();
    let engine_name = engine.to_string();
    tokio::task::spawn_blocking(move || {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        builder
            .append_dir_all(".", &context)
            .map_err(|e| EngineError::backend(&engine_name, "build", format!("packing context: {}", e)))?;
        builder
            .into_inner()
            .map_err(|e| EngineError::backend(&engine_name, "build", format!("finishing archive: {}", e)))
    })
    .await
    .map_err(|e| EngineError::Internal(format!("build context task failed: {}", e)))?
}
