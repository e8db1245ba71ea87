//! Mock container engine for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::traits::{caught, caught_exec, ContainerEngine};
use crate::types::*;
use crate::units::{parse_memory_limit, short_id, split_command, split_image_reference};

/// Mock container engine.
///
/// Simulates workloads, images and networks in memory without any backend.
/// Useful for:
/// - Unit and integration testing of the manager
/// - The CLI's `--dev` mode
/// - Simulating an engine outage via [`MockEngine::set_reachable`]
pub struct MockEngine {
    kind: EngineKind,
    reachable: AtomicBool,
    workloads: RwLock<HashMap<String, MockWorkload>>,
    images: RwLock<HashMap<String, ImageSnapshot>>,
    networks: RwLock<HashMap<String, MockNetwork>>,
    calls: RwLock<Vec<String>>,
}

struct MockWorkload {
    spec: WorkloadSpec,
    status: WorkloadStatus,
    created: DateTime<Utc>,
    networks: BTreeSet<String>,
    log: Vec<String>,
}

struct MockNetwork {
    spec: NetworkSpec,
    created: DateTime<Utc>,
}

impl MockEngine {
    /// Create a reachable mock engine reporting the given kind.
    pub fn new(kind: EngineKind) -> Self {
        info!(kind = %kind, "Creating mock container engine");
        Self {
            kind,
            reachable: AtomicBool::new(true),
            workloads: RwLock::new(HashMap::new()),
            images: RwLock::new(HashMap::new()),
            networks: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Operations received so far, as `operation:target`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, operation: &str, target: &str) -> Result<()> {
        self.calls
            .write()
            .map_err(|_| EngineError::Internal("Lock poisoned".to_string()))?
            .push(format!("{}:{}", operation, target));
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::connectivity(self.kind.as_str(), "mock engine is unreachable"))
        }
    }

    fn poisoned() -> EngineError {
        EngineError::Internal("Lock poisoned".to_string())
    }

    /// Run `f` on the workload matching an id or a name.
    fn with_workload<T>(&self, id: &str, f: impl FnOnce(&str, &mut MockWorkload) -> Result<T>) -> Result<T> {
        let mut workloads = self.workloads.write().map_err(|_| Self::poisoned())?;
        let key = workloads
            .iter()
            .find(|(key, w)| key.as_str() == id || w.spec.name == id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| EngineError::workload_not_found(self.kind.as_str(), id))?;
        match workloads.get_mut(&key) {
            Some(workload) => f(&key, workload),
            None => Err(EngineError::workload_not_found(self.kind.as_str(), id)),
        }
    }

    fn snapshot(&self, id: &str, workload: &MockWorkload) -> WorkloadSnapshot {
        let running = workload.status == WorkloadStatus::Running;
        WorkloadSnapshot {
            id: id.to_string(),
            name: workload.spec.name.clone(),
            image: workload.spec.image.clone(),
            status: workload.status,
            created: Some(workload.created),
            ports: workload.spec.port_mappings().unwrap_or_default(),
            volumes: workload.spec.volumes.clone(),
            network: workload.networks.iter().next().cloned(),
            ip_address: running.then(|| "172.17.0.2".to_string()),
            usage: running.then(|| ResourceUsage {
                cpu_percent: 0.5,
                memory_bytes: 16 * 1024 * 1024,
                memory_limit_bytes: workload
                    .spec
                    .memory_limit
                    .as_deref()
                    .and_then(|m| parse_memory_limit(m).ok()),
            }),
            diagnostic: None,
        }
    }

    fn transition(&self, op: &str, id: &str, to: WorkloadStatus) -> Result<()> {
        self.record(op, id)?;
        self.with_workload(id, |_, w| {
            w.status = to;
            w.log.push(format!("{} {}", Utc::now().to_rfc3339(), op));
            Ok(())
        })
    }

    fn insert_image(&self, reference: &str) -> Result<String> {
        let (repository, tag) = split_image_reference(reference);
        let key = format!("{}:{}", repository, tag);
        let mut images = self.images.write().map_err(|_| Self::poisoned())?;
        let image = images.entry(key).or_insert_with(|| ImageSnapshot {
            id: short_id(&Uuid::new_v4().simple().to_string()),
            repository,
            tag,
            size: "5.0MB".to_string(),
            size_bytes: 5 * 1024 * 1024,
            created: Some(Utc::now()),
        });
        Ok(image.id.clone())
    }

    fn run_command(&self, command: &str) -> Result<ExecResult> {
        let argv = split_command(self.kind.as_str(), command)?;
        let result = match argv[0].as_str() {
            "echo" => ExecResult {
                exit_code: 0,
                output: format!("{}\n", argv[1..].join(" ")),
            },
            "true" => ExecResult { exit_code: 0, output: String::new() },
            "false" => ExecResult { exit_code: 1, output: String::new() },
            other => ExecResult {
                exit_code: 127,
                output: format!("{}: command not found\n", other),
            },
        };
        Ok(result)
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn ping(&self) -> Result<()> {
        self.record("ping", "-")
    }

    #[instrument(skip(self, spec), fields(engine = %self.kind, workload = %spec.name))]
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<String> {
        self.record("create", &spec.name)?;
        info!("Creating mock workload");

        if let Some(limit) = &spec.memory_limit {
            parse_memory_limit(limit).map_err(|e| EngineError::translation(self.kind.as_str(), e))?;
        }
        spec.port_mappings()
            .map_err(|e| EngineError::translation(self.kind.as_str(), e))?;

        let id = Uuid::new_v4().simple().to_string();
        {
            let mut workloads = self.workloads.write().map_err(|_| Self::poisoned())?;
            if workloads.values().any(|w| w.spec.name == spec.name) {
                return Err(EngineError::backend(
                    self.kind.as_str(),
                    "create",
                    format!("name {} is already in use", spec.name),
                ));
            }
            workloads.insert(id.clone(), MockWorkload {
                spec: spec.clone(),
                status: WorkloadStatus::Created,
                created: Utc::now(),
                networks: spec.network.iter().cloned().collect(),
                log: Vec::new(),
            });
        }
        self.insert_image(&spec.image)?;

        info!(workload_id = %id, "Mock workload created");
        Ok(id)
    }

    async fn start_workload(&self, id: &str) -> bool {
        let result = self.transition("start", id, WorkloadStatus::Running).map(|()| true);
        caught(self.kind, "start", id, result)
    }

    async fn stop_workload(&self, id: &str, timeout: Duration) -> bool {
        debug!(timeout_secs = timeout.as_secs(), "Stopping mock workload");
        let result = self.transition("stop", id, WorkloadStatus::Exited).map(|()| true);
        caught(self.kind, "stop", id, result)
    }

    async fn restart_workload(&self, id: &str, _timeout: Duration) -> bool {
        let result = self.transition("restart", id, WorkloadStatus::Running).map(|()| true);
        caught(self.kind, "restart", id, result)
    }

    async fn remove_workload(&self, id: &str, force: bool) -> bool {
        let result = self.record("remove", id).and_then(|()| {
            let (key, running) =
                self.with_workload(id, |key, w| Ok((key.to_string(), w.status == WorkloadStatus::Running)))?;
            if running && !force {
                return Err(EngineError::backend(
                    self.kind.as_str(),
                    "remove",
                    "workload is running; stop it first or force removal",
                ));
            }
            self.workloads.write().map_err(|_| Self::poisoned())?.remove(&key);
            Ok(true)
        });
        caught(self.kind, "remove", id, result)
    }

    async fn inspect_workload(&self, id: &str) -> Result<WorkloadSnapshot> {
        self.record("inspect", id)?;
        self.with_workload(id, |key, w| Ok(self.snapshot(key, w)))
    }

    async fn list_workloads(&self, all: bool) -> Vec<WorkloadSnapshot> {
        let result = self.record("list", "-").and_then(|()| {
            let workloads = self.workloads.read().map_err(|_| Self::poisoned())?;
            let mut list: Vec<_> = workloads
                .iter()
                .filter(|(_, w)| all || w.status == WorkloadStatus::Running)
                .map(|(id, w)| self.snapshot(id, w))
                .collect();
            list.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(list)
        });
        caught(self.kind, "list", "-", result)
    }

    async fn workload_logs(&self, id: &str, tail: usize) -> String {
        let result = self.record("logs", id).and_then(|()| {
            self.with_workload(id, |_, w| {
                let skip = w.log.len().saturating_sub(tail);
                Ok(w.log[skip..].iter().map(|l| format!("{}\n", l)).collect())
            })
        });
        caught(self.kind, "logs", id, result)
    }

    async fn exec(&self, id: &str, command: &str) -> ExecResult {
        let result = self.record("exec", id).and_then(|()| {
            self.with_workload(id, |_, w| {
                if w.status != WorkloadStatus::Running {
                    return Err(EngineError::backend(self.kind.as_str(), "exec", "workload is not running"));
                }
                self.run_command(command)
            })
        });
        caught_exec(self.kind, id, result)
    }

    async fn pull_image(&self, image: &str, tag: &str) -> bool {
        let reference = format!("{}:{}", image, tag);
        let result = self
            .record("pull", &reference)
            .and_then(|()| self.insert_image(&reference))
            .map(|_| true);
        caught(self.kind, "pull", &reference, result)
    }

    async fn list_images(&self) -> Vec<ImageSnapshot> {
        let result = self.record("images", "-").and_then(|()| {
            let images = self.images.read().map_err(|_| Self::poisoned())?;
            let mut list: Vec<_> = images.values().cloned().collect();
            list.sort_by(|a, b| (&a.repository, &a.tag).cmp(&(&b.repository, &b.tag)));
            Ok(list)
        });
        caught(self.kind, "images", "-", result)
    }

    async fn remove_image(&self, id: &str, _force: bool) -> bool {
        let result = self.record("rmi", id).and_then(|()| {
            let mut images = self.images.write().map_err(|_| Self::poisoned())?;
            let before = images.len();
            images.retain(|key, image| key != id && image.id != id);
            if images.len() == before {
                return Err(EngineError::backend(self.kind.as_str(), "rmi", format!("no such image {}", id)));
            }
            Ok(true)
        });
        caught(self.kind, "rmi", id, result)
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        self.record("build", &request.tag)?;
        if !request.context.is_dir() {
            return Err(EngineError::InvalidConfig(format!(
                "build context {} is not a directory",
                request.context.display()
            )));
        }
        self.insert_image(&request.tag).map(|_| ())
    }

    async fn commit_workload(&self, id: &str, repository: &str, tag: &str) -> Result<String> {
        self.record("commit", id)?;
        self.with_workload(id, |_, _| Ok(()))?;
        self.insert_image(&format!("{}:{}", repository, tag))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        self.record("network-create", &spec.name)?;
        let mut networks = self.networks.write().map_err(|_| Self::poisoned())?;
        if networks.values().any(|n| n.spec.name == spec.name) {
            return Err(EngineError::backend(
                self.kind.as_str(),
                "network-create",
                format!("network {} already exists", spec.name),
            ));
        }
        let id = short_id(&Uuid::new_v4().simple().to_string());
        networks.insert(id.clone(), MockNetwork {
            spec: spec.clone(),
            created: Utc::now(),
        });
        Ok(id)
    }

    async fn list_networks(&self) -> Vec<NetworkSnapshot> {
        let result = self.record("networks", "-").and_then(|()| {
            let networks = self.networks.read().map_err(|_| Self::poisoned())?;
            Ok(networks
                .iter()
                .map(|(id, n)| NetworkSnapshot {
                    id: id.clone(),
                    name: n.spec.name.clone(),
                    driver: n.spec.driver.clone(),
                    scope: Some("local".to_string()),
                    subnet: n.spec.subnet.clone(),
                    created: Some(n.created),
                })
                .collect())
        });
        caught(self.kind, "networks", "-", result)
    }

    async fn remove_network(&self, id: &str) -> bool {
        let result = self.record("network-rm", id).and_then(|()| {
            let mut networks = self.networks.write().map_err(|_| Self::poisoned())?;
            let before = networks.len();
            networks.retain(|key, n| key != id && n.spec.name != id);
            Ok(networks.len() < before)
        });
        caught(self.kind, "network-rm", id, result)
    }

    async fn connect_network(&self, workload: &str, network: &str) -> bool {
        let result = self
            .record("network-connect", workload)
            .and_then(|()| self.with_workload(workload, |_, w| Ok(w.networks.insert(network.to_string()))));
        caught(self.kind, "network-connect", workload, result)
    }

    async fn disconnect_network(&self, workload: &str, network: &str) -> bool {
        let result = self
            .record("network-disconnect", workload)
            .and_then(|()| self.with_workload(workload, |_, w| Ok(w.networks.remove(network))));
        caught(self.kind, "network-disconnect", workload, result)
    }

    async fn system_info(&self) -> Result<Value> {
        self.record("info", "-")?;
        let workloads = self.workloads.read().map_err(|_| Self::poisoned())?;
        let running = workloads.values().filter(|w| w.status == WorkloadStatus::Running).count();
        Ok(json!({
            "Driver": "mock",
            "Kind": self.kind.as_str(),
            "Containers": workloads.len(),
            "ContainersRunning": running,
        }))
    }

    async fn version(&self) -> Result<Value> {
        self.record("version", "-")?;
        Ok(json!({ "Version": "mock-1.0.0", "ApiVersion": "1.0" }))
    }
}
