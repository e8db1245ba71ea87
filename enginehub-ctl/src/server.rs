//! Engine registration and the long-running `serve` mode.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use enginehub_engine::{EngineKind, EngineManager, EngineTarget, HealthMonitor, MockEngine};

use crate::config::Config;

/// Name of the in-memory engine registered in dev mode.
pub const DEV_ENGINE: &str = "dev";

/// Build the manager and register every configured engine.
///
/// Engines that fail their probe are skipped with a warning; the rest stay
/// usable.
pub async fn build_manager(config: &Config, dev: bool) -> Result<Arc<EngineManager>> {
    let manager = Arc::new(EngineManager::new());

    if dev {
        info!("Development mode, using in-memory engine");
        manager
            .register_adapter(DEV_ENGINE, EngineTarget::local(), Arc::new(MockEngine::new(EngineKind::Docker)))
            .await?;
        return Ok(manager);
    }

    for engine in &config.engines {
        let registered = manager
            .add_engine(&engine.name, engine.kind, engine.target(), &engine.options)
            .await;
        if !registered {
            warn!(engine = %engine.name, kind = %engine.kind, "Engine not registered");
        }
    }

    if let Some(name) = config.default_engine() {
        if manager.registration(name).await.is_some() {
            manager
                .set_default(name)
                .await
                .with_context(|| format!("Failed to make '{}' the default engine", name))?;
        } else {
            warn!(engine = %name, "Configured default engine is unavailable");
        }
    }

    let names = manager.engine_names().await;
    if names.is_empty() {
        warn!("No engines registered");
    } else {
        info!(
            engines = ?names,
            default = ?manager.default_engine().await,
            "Engines registered"
        );
    }

    Ok(manager)
}

/// Run the health monitor until Ctrl-C.
pub async fn run(config: &Config, manager: Arc<EngineManager>) -> Result<()> {
    let monitor = Arc::new(HealthMonitor::new(manager.clone(), config.health.interval()));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    monitor.run_check_cycle().await;
    let handle = tokio::spawn(monitor.start_loop(shutdown_rx));

    info!(interval_secs = config.health.interval_secs, "enginehub serving, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutdown requested");
    let _ = shutdown_tx.send(());
    handle.await.context("Health monitor task failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dev_mode_registers_mock_engine() {
        let manager = build_manager(&Config::default(), true).await.unwrap();
        assert_eq!(manager.engine_names().await, vec![DEV_ENGINE.to_string()]);
        assert_eq!(manager.default_engine().await.as_deref(), Some(DEV_ENGINE));
    }

    #[tokio::test]
    async fn test_unreachable_engines_are_skipped() {
        let config = Config::from_yaml(
            "engines:\n  - name: broken\n    kind: lxc\n    default: true\n    options:\n      lxc_binary: /nonexistent/lxc\n",
        )
        .unwrap();
        let manager = build_manager(&config, false).await.unwrap();
        assert!(manager.engine_names().await.is_empty());
        assert!(manager.default_engine().await.is_none());
    }
}
