//! LXC adapter: dispatches every operation to the configured transport.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::local::LocalLxc;
use super::remote::RemoteLxd;
use super::translate;
use crate::error::{EngineError, Result};
use crate::traits::{caught, caught_exec, ContainerEngine};
use crate::types::*;

const KIND: EngineKind = EngineKind::Lxc;

enum Transport {
    Local(LocalLxc),
    Remote(RemoteLxd),
}

/// Run the same method on whichever transport is active.
macro_rules! dispatch {
    ($self:ident . $method:ident ( $($arg:expr),* )) => {
        match &$self.transport {
            Transport::Local(t) => t.$method($($arg),*).await,
            Transport::Remote(t) => t.$method($($arg),*).await,
        }
    };
}

/// LXC/LXD backend.
pub struct LxcEngine {
    transport: Transport,
}

impl LxcEngine {
    /// Build the adapter for `options.lxc_mode`. Does not contact the backend.
    pub fn connect(target: &EngineTarget, options: &EngineOptions) -> Result<Self> {
        let transport = match options.lxc_mode {
            LxcMode::Local => {
                if !target.is_local() {
                    warn!(target = %target, "Host ignored in local LXC mode");
                }
                let local = LocalLxc::new(options);
                info!(binary = %local.binary(), "LXC local client configured");
                Transport::Local(local)
            }
            LxcMode::Remote => Transport::Remote(RemoteLxd::connect(target, options)?),
        };
        Ok(Self { transport })
    }

    /// Active transport.
    pub fn mode(&self) -> LxcMode {
        match self.transport {
            Transport::Local(_) => LxcMode::Local,
            Transport::Remote(_) => LxcMode::Remote,
        }
    }
}

#[async_trait]
impl ContainerEngine for LxcEngine {
    fn kind(&self) -> EngineKind {
        KIND
    }

    #[instrument(skip(self), fields(mode = ?self.mode()))]
    async fn ping(&self) -> Result<()> {
        dispatch!(self.ping())
    }

    #[instrument(skip(self, spec), fields(workload = %spec.name, image = %spec.image, mode = ?self.mode()))]
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<String> {
        let ignored = translate::ignored_fields(spec);
        if !ignored.is_empty() {
            warn!(fields = ?ignored, "System containers ignore these fields");
        }
        info!("Creating LXC instance");
        let id = dispatch!(self.create(spec))?;
        info!(workload_id = %id, "LXC instance created");
        Ok(id)
    }

    async fn start_workload(&self, id: &str) -> bool {
        caught(KIND, "start", id, dispatch!(self.lifecycle("start", id, None)))
    }

    async fn stop_workload(&self, id: &str, timeout: Duration) -> bool {
        caught(KIND, "stop", id, dispatch!(self.lifecycle("stop", id, Some(timeout))))
    }

    async fn restart_workload(&self, id: &str, timeout: Duration) -> bool {
        caught(KIND, "restart", id, dispatch!(self.lifecycle("restart", id, Some(timeout))))
    }

    async fn remove_workload(&self, id: &str, force: bool) -> bool {
        caught(KIND, "remove", id, dispatch!(self.remove(id, force)))
    }

    #[instrument(skip(self))]
    async fn inspect_workload(&self, id: &str) -> Result<WorkloadSnapshot> {
        dispatch!(self.inspect(id))
    }

    async fn list_workloads(&self, all: bool) -> Vec<WorkloadSnapshot> {
        caught(KIND, "list", "-", dispatch!(self.list(all)))
    }

    async fn workload_logs(&self, id: &str, tail: usize) -> String {
        caught(KIND, "logs", id, dispatch!(self.logs(id, tail)))
    }

    #[instrument(skip(self))]
    async fn exec(&self, id: &str, command: &str) -> ExecResult {
        caught_exec(KIND, id, dispatch!(self.exec(id, command)))
    }

    async fn pull_image(&self, image: &str, tag: &str) -> bool {
        caught(KIND, "pull", image, dispatch!(self.pull(image, tag)))
    }

    async fn list_images(&self) -> Vec<ImageSnapshot> {
        caught(KIND, "images", "-", dispatch!(self.images()))
    }

    /// `force` has no LXD equivalent.
    async fn remove_image(&self, id: &str, _force: bool) -> bool {
        caught(KIND, "rmi", id, dispatch!(self.rmi(id)))
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        warn!(tag = %request.tag, "LXC does not support Dockerfile builds");
        Err(EngineError::unsupported(KIND.as_str(), "build_image"))
    }

    #[instrument(skip(self))]
    async fn commit_workload(&self, id: &str, repository: &str, tag: &str) -> Result<String> {
        dispatch!(self.commit(id, repository, tag))
    }

    #[instrument(skip(self, spec), fields(network = %spec.name))]
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        dispatch!(self.create_network(spec))
    }

    async fn list_networks(&self) -> Vec<NetworkSnapshot> {
        caught(KIND, "networks", "-", dispatch!(self.networks()))
    }

    async fn remove_network(&self, id: &str) -> bool {
        caught(KIND, "network-rm", id, dispatch!(self.network_rm(id)))
    }

    async fn connect_network(&self, workload: &str, network: &str) -> bool {
        let result = match &self.transport {
            Transport::Local(t) => t.network_membership(true, workload, network).await,
            Transport::Remote(t) => t.connect_network(workload, network).await,
        };
        caught(KIND, "network-connect", workload, result)
    }

    async fn disconnect_network(&self, workload: &str, network: &str) -> bool {
        let result = match &self.transport {
            Transport::Local(t) => t.network_membership(false, workload, network).await,
            Transport::Remote(t) => t.disconnect_network(workload, network).await,
        };
        caught(KIND, "network-disconnect", workload, result)
    }

    async fn system_info(&self) -> Result<Value> {
        dispatch!(self.system_info())
    }

    async fn version(&self) -> Result<Value> {
        dispatch!(self.version())
    }
}
