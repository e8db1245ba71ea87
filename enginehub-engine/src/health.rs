//! Periodic engine health probing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::manager::EngineManager;

/// Default interval between probe rounds.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Runs [`EngineManager::health_check_all`] on a fixed interval.
pub struct HealthMonitor {
    manager: Arc<EngineManager>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(manager: Arc<EngineManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Interval between probe rounds.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe every engine once.
    pub async fn run_check_cycle(&self) -> HashMap<String, bool> {
        let results = self.manager.health_check_all().await;
        let unhealthy: Vec<&String> = results
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| name)
            .collect();
        if unhealthy.is_empty() {
            debug!(engines = results.len(), "All engines healthy");
        } else {
            warn!(unhealthy = ?unhealthy, total = results.len(), "Some engines are degraded");
        }
        results
    }

    /// Probe until a shutdown signal arrives.
    pub async fn start_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Starting engine health loop");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_check_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Engine health loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::EngineState;
    use crate::mock::MockEngine;
    use crate::types::{EngineKind, EngineTarget};

    #[tokio::test]
    async fn test_loop_updates_state_and_stops_on_shutdown() {
        let manager = Arc::new(EngineManager::new());
        let mock = Arc::new(MockEngine::new(EngineKind::Podman));
        manager
            .register_adapter("pod", EngineTarget::local(), mock.clone())
            .await
            .unwrap();
        mock.set_reachable(false);

        let monitor = Arc::new(HealthMonitor::new(manager.clone(), Duration::from_millis(10)));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor.start_loop(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            manager.registration("pod").await.unwrap().state,
            EngineState::Degraded
        );

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_single_cycle() {
        let manager = Arc::new(EngineManager::new());
        manager
            .register_adapter("a", EngineTarget::local(), Arc::new(MockEngine::new(EngineKind::Docker)))
            .await
            .unwrap();
        let monitor = HealthMonitor::new(manager, DEFAULT_HEALTH_INTERVAL);
        let results = monitor.run_check_cycle().await;
        assert_eq!(results.get("a"), Some(&true));
    }
}
