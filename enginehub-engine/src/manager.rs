//! Engine registry and router.
//!
//! The [`EngineManager`] owns every registered adapter. Callers name an
//! engine or fall back to the default one; aggregate queries fan out to all
//! engines concurrently and tolerate individual engines being down.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::docker::DockerEngine;
use crate::error::{EngineError, Result};
use crate::lxc::LxcEngine;
use crate::podman::PodmanEngine;
use crate::traits::ContainerEngine;
use crate::types::*;

/// Grace period used by callers that do not pick a stop timeout.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// REGISTRATIONS
// =============================================================================

/// Health of a registered engine as of its last check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Last probe succeeded
    Connected,
    /// Last probe failed; the engine stays registered and routable
    Degraded,
}

impl EngineState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }
}

/// A registered engine.
#[derive(Clone)]
pub struct EngineRegistration {
    pub name: String,
    pub kind: EngineKind,
    pub target: EngineTarget,
    pub state: EngineState,
    pub registered_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    adapter: Arc<dyn ContainerEngine>,
}

impl EngineRegistration {
    /// Adapter handle.
    pub fn adapter(&self) -> Arc<dyn ContainerEngine> {
        Arc::clone(&self.adapter)
    }
}

impl std::fmt::Debug for EngineRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("registered_at", &self.registered_at)
            .field("last_checked", &self.last_checked)
            .finish()
    }
}

/// Row returned by [`EngineManager::list_engines`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSummary {
    pub name: String,
    pub kind: EngineKind,
    pub target: String,
    pub connected: bool,
    pub is_default: bool,
    pub state: EngineState,
}

#[derive(Default)]
struct Registry {
    engines: HashMap<String, EngineRegistration>,
    default: Option<String>,
}

/// Construct the adapter for a backend kind. Does not contact the backend.
pub fn build_adapter(
    kind: EngineKind,
    target: &EngineTarget,
    options: &EngineOptions,
) -> Result<Arc<dyn ContainerEngine>> {
    let adapter: Arc<dyn ContainerEngine> = match kind {
        EngineKind::Docker => Arc::new(DockerEngine::connect(target, options)?),
        EngineKind::Podman => Arc::new(PodmanEngine::connect(target, options)?),
        EngineKind::Lxc => Arc::new(LxcEngine::connect(target, options)?),
    };
    Ok(adapter)
}

// =============================================================================
// MANAGER
// =============================================================================

/// Registry of named engines with a default pointer.
///
/// No lock is held across a backend call: routing clones the adapter `Arc`
/// out of the registry first.
#[derive(Default)]
pub struct EngineManager {
    registry: RwLock<Registry>,
}

impl EngineManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Build an adapter, probe it and register it under `name`.
    ///
    /// Nothing is stored when the name is taken or the probe fails.
    #[instrument(skip(self, options), fields(engine = %name, kind = %kind, target = %target))]
    pub async fn register(
        &self,
        name: &str,
        kind: EngineKind,
        target: EngineTarget,
        options: &EngineOptions,
    ) -> Result<()> {
        self.ensure_unregistered(name).await?;
        let adapter = build_adapter(kind, &target, options)?;
        self.register_adapter(name, target, adapter).await
    }

    /// Probe and register a pre-built adapter.
    pub async fn register_adapter(
        &self,
        name: &str,
        target: EngineTarget,
        adapter: Arc<dyn ContainerEngine>,
    ) -> Result<()> {
        self.ensure_unregistered(name).await?;

        if let Err(e) = adapter.ping().await {
            error!(engine = %name, error = %e, "Engine probe failed, not registering");
            return Err(e);
        }

        let now = Utc::now();
        let mut registry = self.registry.write().await;
        // a concurrent register may have won while we were probing
        if registry.engines.contains_key(name) {
            return Err(EngineError::DuplicateEngine(name.to_string()));
        }
        registry.engines.insert(
            name.to_string(),
            EngineRegistration {
                name: name.to_string(),
                kind: adapter.kind(),
                target: target.clone(),
                state: EngineState::Connected,
                registered_at: now,
                last_checked: now,
                adapter,
            },
        );
        if registry.default.is_none() {
            registry.default = Some(name.to_string());
        }

        info!(
            engine = %name,
            target = %target,
            is_default = registry.default.as_deref() == Some(name),
            "Engine registered"
        );
        Ok(())
    }

    /// [`register`](Self::register), reporting success as a bool.
    pub async fn add_engine(
        &self,
        name: &str,
        kind: EngineKind,
        target: EngineTarget,
        options: &EngineOptions,
    ) -> bool {
        match self.register(name, kind, target, options).await {
            Ok(()) => true,
            Err(e) => {
                error!(engine = %name, error = %e, "Failed to add engine");
                false
            }
        }
    }

    async fn ensure_unregistered(&self, name: &str) -> Result<()> {
        if self.registry.read().await.engines.contains_key(name) {
            warn!(engine = %name, "Engine name already registered");
            return Err(EngineError::DuplicateEngine(name.to_string()));
        }
        Ok(())
    }

    /// Remove an engine. Removing the default promotes another engine, if any.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write().await;
        if registry.engines.remove(name).is_none() {
            return Err(EngineError::EngineNotFound(name.to_string()));
        }
        if registry.default.as_deref() == Some(name) {
            registry.default = registry.engines.keys().min().cloned();
            if let Some(promoted) = &registry.default {
                info!(engine = %promoted, "Promoted engine to default");
            }
        }
        info!(engine = %name, "Engine unregistered");
        Ok(())
    }

    /// [`unregister`](Self::unregister), reporting success as a bool.
    pub async fn remove_engine(&self, name: &str) -> bool {
        match self.unregister(name).await {
            Ok(()) => true,
            Err(e) => {
                warn!(engine = %name, error = %e, "Failed to remove engine");
                false
            }
        }
    }

    /// Make `name` the default engine.
    pub async fn set_default(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write().await;
        if !registry.engines.contains_key(name) {
            return Err(EngineError::EngineNotFound(name.to_string()));
        }
        registry.default = Some(name.to_string());
        info!(engine = %name, "Default engine set");
        Ok(())
    }

    /// Name of the default engine.
    pub async fn default_engine(&self) -> Option<String> {
        self.registry.read().await.default.clone()
    }

    /// Registration details for `name`.
    pub async fn registration(&self, name: &str) -> Option<EngineRegistration> {
        self.registry.read().await.engines.get(name).cloned()
    }

    /// Registered engine names, sorted.
    pub async fn engine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().await.engines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Adapter for `engine`, or for the default engine when `None`.
    pub async fn resolve(&self, engine: Option<&str>) -> Result<Arc<dyn ContainerEngine>> {
        let registry = self.registry.read().await;
        let name = match engine {
            Some(name) => name,
            None => registry
                .default
                .as_deref()
                .ok_or_else(|| EngineError::EngineNotFound("no default engine".to_string()))?,
        };
        registry
            .engines
            .get(name)
            .map(EngineRegistration::adapter)
            .ok_or_else(|| EngineError::EngineNotFound(name.to_string()))
    }

    /// All adapters, default first, then by name.
    async fn snapshot(&self) -> Vec<(String, Arc<dyn ContainerEngine>)> {
        let registry = self.registry.read().await;
        let mut engines: Vec<(String, Arc<dyn ContainerEngine>)> = registry
            .engines
            .values()
            .map(|r| (r.name.clone(), r.adapter()))
            .collect();
        let default = registry.default.clone();
        engines.sort_by(|(a, _), (b, _)| {
            let a_default = default.as_deref() == Some(a.as_str());
            let b_default = default.as_deref() == Some(b.as_str());
            b_default.cmp(&a_default).then_with(|| a.cmp(b))
        });
        engines
    }

    // =========================================================================
    // Routed workload operations
    // =========================================================================

    #[instrument(skip(self, spec), fields(workload = %spec.name, engine = ?engine))]
    pub async fn create_workload(&self, spec: &WorkloadSpec, engine: Option<&str>) -> Result<String> {
        self.resolve(engine).await?.create_workload(spec).await
    }

    pub async fn start_workload(&self, id: &str, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.start_workload(id).await)
    }

    pub async fn stop_workload(&self, id: &str, timeout: Duration, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.stop_workload(id, timeout).await)
    }

    pub async fn restart_workload(&self, id: &str, timeout: Duration, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.restart_workload(id, timeout).await)
    }

    pub async fn remove_workload(&self, id: &str, force: bool, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.remove_workload(id, force).await)
    }

    pub async fn inspect_workload(&self, id: &str, engine: Option<&str>) -> Result<WorkloadSnapshot> {
        self.resolve(engine).await?.inspect_workload(id).await
    }

    pub async fn list_workloads(&self, all: bool, engine: Option<&str>) -> Result<Vec<WorkloadSnapshot>> {
        Ok(self.resolve(engine).await?.list_workloads(all).await)
    }

    pub async fn workload_logs(&self, id: &str, tail: usize, engine: Option<&str>) -> Result<String> {
        Ok(self.resolve(engine).await?.workload_logs(id, tail).await)
    }

    pub async fn exec(&self, id: &str, command: &str, engine: Option<&str>) -> Result<ExecResult> {
        Ok(self.resolve(engine).await?.exec(id, command).await)
    }

    // =========================================================================
    // Routed image & network operations
    // =========================================================================

    pub async fn pull_image(&self, image: &str, tag: &str, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.pull_image(image, tag).await)
    }

    pub async fn list_images(&self, engine: Option<&str>) -> Result<Vec<ImageSnapshot>> {
        Ok(self.resolve(engine).await?.list_images().await)
    }

    pub async fn remove_image(&self, id: &str, force: bool, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.remove_image(id, force).await)
    }

    pub async fn build_image(&self, request: &BuildRequest, engine: Option<&str>) -> Result<()> {
        self.resolve(engine).await?.build_image(request).await
    }

    pub async fn commit_workload(
        &self,
        id: &str,
        repository: &str,
        tag: &str,
        engine: Option<&str>,
    ) -> Result<String> {
        self.resolve(engine).await?.commit_workload(id, repository, tag).await
    }

    pub async fn create_network(&self, spec: &NetworkSpec, engine: Option<&str>) -> Result<String> {
        self.resolve(engine).await?.create_network(spec).await
    }

    pub async fn list_networks(&self, engine: Option<&str>) -> Result<Vec<NetworkSnapshot>> {
        Ok(self.resolve(engine).await?.list_networks().await)
    }

    pub async fn remove_network(&self, id: &str, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.remove_network(id).await)
    }

    pub async fn connect_network(&self, workload: &str, network: &str, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.connect_network(workload, network).await)
    }

    pub async fn disconnect_network(&self, workload: &str, network: &str, engine: Option<&str>) -> Result<bool> {
        Ok(self.resolve(engine).await?.disconnect_network(workload, network).await)
    }

    pub async fn system_info(&self, engine: Option<&str>) -> Result<Value> {
        self.resolve(engine).await?.system_info().await
    }

    pub async fn version(&self, engine: Option<&str>) -> Result<Value> {
        self.resolve(engine).await?.version().await
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Workloads of every engine, keyed by engine name.
    pub async fn list_all_workloads(&self, all: bool) -> HashMap<String, Vec<WorkloadSnapshot>> {
        let engines = self.snapshot().await;
        let lists = join_all(engines.iter().map(|(_, engine)| engine.list_workloads(all))).await;
        engines.into_iter().map(|(name, _)| name).zip(lists).collect()
    }

    /// Images of every engine, keyed by engine name.
    pub async fn list_all_images(&self) -> HashMap<String, Vec<ImageSnapshot>> {
        let engines = self.snapshot().await;
        let lists = join_all(engines.iter().map(|(_, engine)| engine.list_images())).await;
        engines.into_iter().map(|(name, _)| name).zip(lists).collect()
    }

    /// Networks of every engine, keyed by engine name.
    pub async fn list_all_networks(&self) -> HashMap<String, Vec<NetworkSnapshot>> {
        let engines = self.snapshot().await;
        let lists = join_all(engines.iter().map(|(_, engine)| engine.list_networks())).await;
        engines.into_iter().map(|(name, _)| name).zip(lists).collect()
    }

    /// System info of every engine; failed engines map to an empty object.
    pub async fn all_system_info(&self) -> HashMap<String, Value> {
        let engines = self.snapshot().await;
        let results = join_all(engines.iter().map(|(_, engine)| engine.system_info())).await;
        engines
            .into_iter()
            .zip(results)
            .map(|((name, _), result)| {
                let info = result.unwrap_or_else(|e| {
                    warn!(engine = %name, error = %e, "System info unavailable");
                    json!({})
                });
                (name, info)
            })
            .collect()
    }

    /// Versions of every engine; failed engines map to an empty object.
    pub async fn all_versions(&self) -> HashMap<String, Value> {
        let engines = self.snapshot().await;
        let results = join_all(engines.iter().map(|(_, engine)| engine.version())).await;
        engines
            .into_iter()
            .zip(results)
            .map(|((name, _), result)| {
                let version = result.unwrap_or_else(|e| {
                    warn!(engine = %name, error = %e, "Version unavailable");
                    json!({})
                });
                (name, version)
            })
            .collect()
    }

    /// Probe every engine and record the outcome on its registration.
    #[instrument(skip(self))]
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let engines = self.snapshot().await;
        let probes = join_all(engines.iter().map(|(_, engine)| engine.ping())).await;

        let now = Utc::now();
        let mut results = HashMap::with_capacity(engines.len());
        let mut registry = self.registry.write().await;
        for ((name, _), probe) in engines.into_iter().zip(probes) {
            let healthy = match probe {
                Ok(()) => true,
                Err(e) => {
                    warn!(engine = %name, error = %e, "Engine health check failed");
                    false
                }
            };
            // unregistered while probing
            if let Some(registration) = registry.engines.get_mut(&name) {
                let state = if healthy { EngineState::Connected } else { EngineState::Degraded };
                if registration.state != state {
                    info!(engine = %name, state = state.as_str(), "Engine state changed");
                }
                registration.state = state;
                registration.last_checked = now;
            }
            results.insert(name, healthy);
        }
        debug!(engines = results.len(), "Health check complete");
        results
    }

    /// Probe every engine and describe the registry, sorted by name.
    pub async fn list_engines(&self) -> Vec<EngineSummary> {
        let health = self.health_check_all().await;
        let registry = self.registry.read().await;
        let mut summaries: Vec<EngineSummary> = registry
            .engines
            .values()
            .map(|r| EngineSummary {
                name: r.name.clone(),
                kind: r.kind,
                target: r.target.to_string(),
                connected: health.get(&r.name).copied().unwrap_or(false),
                is_default: registry.default.as_deref() == Some(r.name.as_str()),
                state: r.state,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// First engine (default first) that can inspect `id`.
    pub async fn find_workload_engine(&self, id: &str) -> Option<String> {
        for (name, engine) in self.snapshot().await {
            match engine.inspect_workload(id).await {
                Ok(_) => return Some(name),
                Err(e) if e.is_not_found() => {}
                Err(e) => debug!(engine = %name, workload = %id, error = %e, "Inspect failed during lookup"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    async fn manager_with(names: &[&str]) -> (EngineManager, Vec<Arc<MockEngine>>) {
        let manager = EngineManager::new();
        let mut mocks = Vec::new();
        for name in names {
            let mock = Arc::new(MockEngine::new(EngineKind::Docker));
            manager
                .register_adapter(name, EngineTarget::local(), mock.clone())
                .await
                .unwrap();
            mocks.push(mock);
        }
        (manager, mocks)
    }

    #[tokio::test]
    async fn test_first_engine_becomes_default() {
        let (manager, _) = manager_with(&["a", "b"]).await;
        assert_eq!(manager.default_engine().await.as_deref(), Some("a"));
        manager.set_default("b").await.unwrap();
        assert_eq!(manager.default_engine().await.as_deref(), Some("b"));
        assert!(manager.set_default("zzz").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_existing() {
        let (manager, mocks) = manager_with(&["a"]).await;
        let other = Arc::new(MockEngine::new(EngineKind::Podman));
        let err = manager
            .register_adapter("a", EngineTarget::remote("elsewhere"), other.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateEngine(_)));
        assert!(other.calls().is_empty());

        let registration = manager.registration("a").await.unwrap();
        assert_eq!(registration.kind, EngineKind::Docker);
        assert!(registration.target.is_local());

        // the original adapter still serves the name
        manager.inspect_workload("ghost", Some("a")).await.unwrap_err();
        assert!(mocks[0].calls().contains(&"inspect:ghost".to_string()));
    }

    #[tokio::test]
    async fn test_failed_probe_is_never_registered() {
        let manager = EngineManager::new();
        let down = Arc::new(MockEngine::new(EngineKind::Lxc));
        down.set_reachable(false);

        let err = manager
            .register_adapter("down", EngineTarget::local(), down)
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert!(manager.resolve(Some("down")).await.err().unwrap().is_not_found());
        assert!(manager.resolve(None).await.is_err());
        assert_eq!(manager.default_engine().await, None);
    }

    #[tokio::test]
    async fn test_removing_default_promotes_remaining_engine() {
        let (manager, _) = manager_with(&["a", "b", "c"]).await;

        assert!(manager.remove_engine("a").await);
        assert_eq!(manager.default_engine().await.as_deref(), Some("b"));
        let defaults = manager.list_engines().await.iter().filter(|e| e.is_default).count();
        assert_eq!(defaults, 1);

        assert!(manager.remove_engine("b").await);
        assert!(manager.remove_engine("c").await);
        assert_eq!(manager.default_engine().await, None);
        assert!(!manager.remove_engine("c").await);
    }

    #[tokio::test]
    async fn test_health_check_marks_degraded() {
        let (manager, mocks) = manager_with(&["a", "b"]).await;
        mocks[1].set_reachable(false);

        let health = manager.health_check_all().await;
        assert_eq!(health["a"], true);
        assert_eq!(health["b"], false);
        assert_eq!(manager.registration("b").await.unwrap().state, EngineState::Degraded);

        // still routable while degraded
        assert!(manager.resolve(Some("b")).await.is_ok());

        mocks[1].set_reachable(true);
        manager.health_check_all().await;
        assert_eq!(manager.registration("b").await.unwrap().state, EngineState::Connected);
    }

    #[tokio::test]
    async fn test_aggregate_failures_stay_per_engine() {
        let (manager, mocks) = manager_with(&["a", "b"]).await;
        manager
            .create_workload(&WorkloadSpec::new("web", "nginx"), Some("a"))
            .await
            .unwrap();
        mocks[1].set_reachable(false);

        let info = manager.all_system_info().await;
        assert_eq!(info["b"], json!({}));
        assert!(info["a"].as_object().map_or(false, |o| !o.is_empty()));

        let versions = manager.all_versions().await;
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn test_find_workload_engine() {
        let (manager, _) = manager_with(&["a", "b"]).await;
        let id = manager
            .create_workload(&WorkloadSpec::new("db", "postgres:16"), Some("b"))
            .await
            .unwrap();

        assert_eq!(manager.find_workload_engine(&id).await.as_deref(), Some("b"));
        assert_eq!(manager.find_workload_engine("db").await.as_deref(), Some("b"));
        assert_eq!(manager.find_workload_engine("nope").await, None);
    }
}
