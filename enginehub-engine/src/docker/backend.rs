//! Docker backend implementation.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{
    BuildImageOptions, CommitContainerOptions, CreateImageOptions, ListImagesOptions,
    RemoveImageOptions,
};
use bollard::models::{
    DeviceMapping, EndpointSettings, HostConfig, Ipam, IpamConfig, PortBinding,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, ListNetworksOptions,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::future::join_all;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::DEFAULT_DOCKER_PORT;
use crate::archive::tar_build_context;
use crate::error::{EngineError, Result};
use crate::normalize;
use crate::traits::{caught, caught_exec, ContainerEngine};
use crate::types::*;
use crate::units::{cpu_quota, parse_memory_limit, split_command};

const KIND: EngineKind = EngineKind::Docker;

/// Docker Engine API backend.
pub struct DockerEngine {
    docker: Docker,
    endpoint: String,
    ping_timeout: Duration,
}

impl DockerEngine {
    /// Build a client for the target. Does not contact the daemon.
    ///
    /// Supported targets:
    /// - no host: platform defaults (`DOCKER_HOST` or the local socket)
    /// - `unix:///var/run/docker.sock` or a bare socket path
    /// - `tcp://host:2375`, `http://host:2375` or a bare `host[:port]`
    pub fn connect(target: &EngineTarget, options: &EngineOptions) -> Result<Self> {
        let timeout = options.request_timeout_secs;
        let target = match target.port {
            Some(_) => target.clone(),
            None => target.clone().with_port(DEFAULT_DOCKER_PORT),
        };

        let (docker, endpoint) = match target.endpoint() {
            None => (Docker::connect_with_local_defaults(), "local".to_string()),
            Some(socket) if socket.starts_with("unix://") || socket.starts_with('/') => {
                (Docker::connect_with_unix(&socket, timeout, API_DEFAULT_VERSION), socket)
            }
            Some(addr) => {
                let addr = if addr.contains("://") { addr } else { format!("tcp://{}", addr) };
                (Docker::connect_with_http(&addr, timeout, API_DEFAULT_VERSION), addr)
            }
        };
        let docker = docker.map_err(|e| EngineError::connectivity(KIND.as_str(), e))?;

        info!(endpoint = %endpoint, "Docker client configured");

        Ok(Self {
            docker,
            endpoint,
            ping_timeout: Duration::from_secs(options.ping_timeout_secs),
        })
    }

    fn call_error(operation: &str, e: BollardError) -> EngineError {
        EngineError::backend(KIND.as_str(), operation, e)
    }

    fn is_missing(e: &BollardError) -> bool {
        matches!(e, BollardError::DockerResponseServerError { status_code: 404, .. })
    }

    // =========================================================================
    // Fallible operations behind the soft trait methods
    // =========================================================================

    async fn start(&self, id: &str) -> Result<bool> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::call_error("start", e))?;
        info!(workload = %id, "Docker container started");
        Ok(true)
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<bool> {
        let options = StopContainerOptions { t: timeout.as_secs() as _ };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| Self::call_error("stop", e))?;
        info!(workload = %id, "Docker container stopped");
        Ok(true)
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<bool> {
        let options = RestartContainerOptions { t: timeout.as_secs() as _ };
        self.docker
            .restart_container(id, Some(options))
            .await
            .map_err(|e| Self::call_error("restart", e))?;
        info!(workload = %id, "Docker container restarted");
        Ok(true)
    }

    async fn remove(&self, id: &str, force: bool) -> Result<bool> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| Self::call_error("remove", e))?;
        info!(workload = %id, force, "Docker container removed");
        Ok(true)
    }

    /// Inspect and normalize; `with_usage` adds a one-shot stats sample.
    async fn inspect(&self, id: &str, with_usage: bool) -> Result<WorkloadSnapshot> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if Self::is_missing(&e) {
                    EngineError::workload_not_found(KIND.as_str(), id)
                } else {
                    Self::call_error("inspect", e)
                }
            })?;

        let mut snapshot = match serde_json::to_value(&response) {
            Ok(value) => normalize::workload_snapshot(KIND.as_str(), &value),
            Err(e) => WorkloadSnapshot::degraded(
                response.id.clone().unwrap_or_else(|| id.to_string()),
                response.name.clone().unwrap_or_default().trim_start_matches('/'),
                WorkloadStatus::Unknown,
                format!("unserializable inspect response: {}", e),
            ),
        };

        if with_usage && snapshot.status == WorkloadStatus::Running {
            snapshot.usage = self.sample_usage(id).await;
        }
        Ok(snapshot)
    }

    async fn sample_usage(&self, id: &str) -> Option<ResourceUsage> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = Box::pin(self.docker.stats(id, Some(options)));
        match stream.next().await {
            Some(Ok(stats)) => serde_json::to_value(&stats)
                .ok()
                .and_then(|v| normalize::usage_from_stats(&v)),
            Some(Err(e)) => {
                debug!(workload = %id, error = %e, "Stats sample unavailable");
                None
            }
            None => None,
        }
    }

    async fn list(&self, all: bool) -> Result<Vec<WorkloadSnapshot>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Self::call_error("list", e))?;

        let inspections = summaries.iter().map(|summary| async move {
            let id = summary.id.clone().unwrap_or_default();
            match self.inspect(&id, false).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    // Raced with removal or daemon hiccup; fall back to the summary row.
                    warn!(workload = %id, error = %e, "Inspect failed during list, using summary");
                    let value = serde_json::to_value(summary).unwrap_or(Value::Null);
                    normalize::workload_snapshot(KIND.as_str(), &value)
                }
            }
        });

        Ok(join_all(inspections).await)
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut stream = Box::pin(self.docker.logs(id, Some(options)));
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&log_text(chunk.map_err(|e| Self::call_error("logs", e))?));
        }
        Ok(text)
    }

    async fn run_exec(&self, id: &str, command: &str) -> Result<ExecResult> {
        let argv = split_command(KIND.as_str(), command)?;

        let options = CreateExecOptions {
            cmd: Some(argv),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| Self::call_error("exec", e))?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Self::call_error("exec", e))?
        {
            while let Some(chunk) = stream.next().await {
                output.push_str(&log_text(chunk.map_err(|e| Self::call_error("exec", e))?));
            }
        }

        Ok(ExecResult {
            exit_code: self.exec_exit_code(&exec.id).await?,
            output,
        })
    }

    /// Exit code of a finished exec session, -1 when the daemon has none.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<i64> {
        let inspect = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| Self::call_error("exec", e))?;
        Ok(inspect.exit_code.unwrap_or(-1))
    }

    async fn pull(&self, image: &str, tag: &str) -> Result<bool> {
        let options = CreateImageOptions {
            from_image: image,
            tag,
            ..Default::default()
        };
        let mut stream = Box::pin(self.docker.create_image(Some(options), None, None));
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| Self::call_error("pull", e))?;
            if let Some(status) = progress.status {
                debug!(status = %status, "Pull progress");
            }
        }
        info!(image = %image, tag = %tag, "Docker image pulled");
        Ok(true)
    }

    async fn images(&self) -> Result<Vec<ImageSnapshot>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| Self::call_error("images", e))?;
        Ok(images
            .iter()
            .filter_map(|image| serde_json::to_value(image).ok())
            .map(|value| normalize::image_snapshot(&value))
            .collect())
    }

    async fn rmi(&self, id: &str, force: bool) -> Result<bool> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_image(id, Some(options), None)
            .await
            .map_err(|e| Self::call_error("rmi", e))?;
        info!(image = %id, "Docker image removed");
        Ok(true)
    }

    async fn networks(&self) -> Result<Vec<NetworkSnapshot>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(|e| Self::call_error("networks", e))?;
        Ok(networks
            .iter()
            .filter_map(|network| serde_json::to_value(network).ok())
            .map(|value| normalize::network_snapshot(&value))
            .collect())
    }

    async fn network_rm(&self, id: &str) -> Result<bool> {
        self.docker
            .remove_network(id)
            .await
            .map_err(|e| Self::call_error("network-rm", e))?;
        info!(network = %id, "Docker network removed");
        Ok(true)
    }

    async fn network_connect(&self, workload: &str, network: &str) -> Result<bool> {
        let options = ConnectNetworkOptions {
            container: workload,
            endpoint_config: EndpointSettings::default(),
        };
        self.docker
            .connect_network(network, options)
            .await
            .map_err(|e| Self::call_error("network-connect", e))?;
        info!(workload = %workload, network = %network, "Docker container connected to network");
        Ok(true)
    }

    async fn network_disconnect(&self, workload: &str, network: &str) -> Result<bool> {
        let options = DisconnectNetworkOptions {
            container: workload,
            force: false,
        };
        self.docker
            .disconnect_network(network, options)
            .await
            .map_err(|e| Self::call_error("network-disconnect", e))?;
        info!(workload = %workload, network = %network, "Docker container disconnected from network");
        Ok(true)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn kind(&self) -> EngineKind {
        KIND
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn ping(&self) -> Result<()> {
        match tokio::time::timeout(self.ping_timeout, self.docker.ping()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(EngineError::connectivity(KIND.as_str(), e)),
            Err(_) => Err(EngineError::connectivity(
                KIND.as_str(),
                format!("no answer from {} within {:?}", self.endpoint, self.ping_timeout),
            )),
        }
    }

    #[instrument(skip(self, spec), fields(workload = %spec.name, image = %spec.image))]
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<String> {
        info!("Creating Docker container");

        let config = container_config(spec)?;
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Self::call_error("create", e))?;

        info!(workload_id = %response.id, "Docker container created");
        Ok(response.id)
    }

    async fn start_workload(&self, id: &str) -> bool {
        caught(KIND, "start", id, self.start(id).await)
    }

    async fn stop_workload(&self, id: &str, timeout: Duration) -> bool {
        caught(KIND, "stop", id, self.stop(id, timeout).await)
    }

    async fn restart_workload(&self, id: &str, timeout: Duration) -> bool {
        caught(KIND, "restart", id, self.restart(id, timeout).await)
    }

    async fn remove_workload(&self, id: &str, force: bool) -> bool {
        caught(KIND, "remove", id, self.remove(id, force).await)
    }

    #[instrument(skip(self))]
    async fn inspect_workload(&self, id: &str) -> Result<WorkloadSnapshot> {
        self.inspect(id, true).await
    }

    async fn list_workloads(&self, all: bool) -> Vec<WorkloadSnapshot> {
        caught(KIND, "list", "-", self.list(all).await)
    }

    async fn workload_logs(&self, id: &str, tail: usize) -> String {
        caught(KIND, "logs", id, self.logs(id, tail).await)
    }

    #[instrument(skip(self))]
    async fn exec(&self, id: &str, command: &str) -> ExecResult {
        caught_exec(KIND, id, self.run_exec(id, command).await)
    }

    async fn pull_image(&self, image: &str, tag: &str) -> bool {
        caught(KIND, "pull", image, self.pull(image, tag).await)
    }

    async fn list_images(&self) -> Vec<ImageSnapshot> {
        caught(KIND, "images", "-", self.images().await)
    }

    async fn remove_image(&self, id: &str, force: bool) -> bool {
        caught(KIND, "rmi", id, self.rmi(id, force).await)
    }

    #[instrument(skip(self, request), fields(tag = %request.tag))]
    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        let context = tar_build_context(KIND.as_str(), &request.context, &request.dockerfile).await?;
        info!(context_bytes = context.len(), "Building Docker image");

        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone(),
            buildargs: request
                .build_args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            rm: true,
            ..Default::default()
        };

        let mut stream = Box::pin(self.docker.build_image(options, None, Some(context.into())));
        while let Some(step) = stream.next().await {
            let step = step.map_err(|e| Self::call_error("build", e))?;
            if let Some(error) = step.error {
                return Err(EngineError::backend(KIND.as_str(), "build", error));
            }
            if let Some(line) = step.stream {
                debug!(output = %line.trim_end(), "Build output");
            }
        }

        info!("Docker image built");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn commit_workload(&self, id: &str, repository: &str, tag: &str) -> Result<String> {
        let options = CommitContainerOptions {
            container: id,
            repo: repository,
            tag,
            pause: true,
            ..Default::default()
        };
        let commit = self
            .docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| Self::call_error("commit", e))?;

        let reference = format!("{}:{}", repository, tag);
        let image_id = match commit.id {
            Some(id) if !id.is_empty() => id,
            _ => self
                .docker
                .inspect_image(&reference)
                .await
                .map_err(|e| Self::call_error("commit", e))?
                .id
                .unwrap_or_else(|| reference.clone()),
        };

        info!(image = %reference, image_id = %image_id, "Docker container committed");
        Ok(image_id)
    }

    #[instrument(skip(self, spec), fields(network = %spec.name))]
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let ipam = Ipam {
            config: spec.subnet.as_ref().map(|subnet| {
                vec![IpamConfig {
                    subnet: Some(subnet.clone()),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        };
        let options = CreateNetworkOptions {
            name: spec.name.as_str(),
            driver: spec.driver.as_str(),
            ipam,
            ..Default::default()
        };
        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| Self::call_error("network-create", e))?;

        info!(network_id = %response.id, "Docker network created");
        Ok(response.id)
    }

    async fn list_networks(&self) -> Vec<NetworkSnapshot> {
        caught(KIND, "networks", "-", self.networks().await)
    }

    async fn remove_network(&self, id: &str) -> bool {
        caught(KIND, "network-rm", id, self.network_rm(id).await)
    }

    async fn connect_network(&self, workload: &str, network: &str) -> bool {
        caught(KIND, "network-connect", workload, self.network_connect(workload, network).await)
    }

    async fn disconnect_network(&self, workload: &str, network: &str) -> bool {
        caught(KIND, "network-disconnect", workload, self.network_disconnect(workload, network).await)
    }

    async fn system_info(&self) -> Result<Value> {
        let info = self.docker.info().await.map_err(|e| Self::call_error("info", e))?;
        serde_json::to_value(info).map_err(|e| EngineError::translation(KIND.as_str(), e))
    }

    async fn version(&self) -> Result<Value> {
        let version = self.docker.version().await.map_err(|e| Self::call_error("version", e))?;
        serde_json::to_value(version).map_err(|e| EngineError::translation(KIND.as_str(), e))
    }
}

fn log_text(chunk: LogOutput) -> String {
    match chunk {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => String::from_utf8_lossy(&message).into_owned(),
    }
}

/// Translate a workload spec into a Docker create request.
pub(crate) fn container_config(spec: &WorkloadSpec) -> Result<Config<String>> {
    let ports = spec
        .port_mappings()
        .map_err(|e| EngineError::translation(KIND.as_str(), e))?;

    let exposed_ports: HashMap<String, HashMap<(), ()>> =
        ports.iter().map(|p| (p.key(), HashMap::new())).collect();
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = ports
        .iter()
        .map(|p| {
            let binding = PortBinding {
                host_ip: p.host_ip.clone(),
                host_port: p.host_port.map(|port| port.to_string()),
            };
            (p.key(), Some(vec![binding]))
        })
        .collect();

    let memory = spec
        .memory_limit
        .as_deref()
        .map(parse_memory_limit)
        .transpose()
        .map_err(|e| EngineError::translation(KIND.as_str(), e))?
        .map(|bytes| {
            i64::try_from(bytes).map_err(|_| {
                EngineError::translation(KIND.as_str(), format!("memory limit of {} bytes is out of range", bytes))
            })
        })
        .transpose()?;
    let (cpu_quota, cpu_period) = match spec.cpu_limit {
        Some(cores) => {
            let (quota, period) = cpu_quota(KIND.as_str(), cores)?;
            (Some(quota), Some(period))
        }
        None => (None, None),
    };

    let restart = match spec.restart_policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(
            spec.volumes
                .iter()
                .map(|(host, container)| format!("{}:{}", host, container))
                .collect(),
        ),
        network_mode: spec.network.clone(),
        memory,
        cpu_quota,
        cpu_period,
        privileged: Some(spec.privileged),
        devices: Some(
            spec.devices
                .iter()
                .map(|path| DeviceMapping {
                    path_on_host: Some(path.clone()),
                    path_in_container: Some(path.clone()),
                    cgroup_permissions: Some("rwm".to_string()),
                })
                .collect(),
        ),
        restart_policy: Some(DockerRestartPolicy {
            name: Some(restart),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    Ok(Config {
        image: Some(spec.image.clone()),
        env: Some(
            spec.environment
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
        ),
        cmd: spec
            .command
            .as_deref()
            .map(|command| split_command(KIND.as_str(), command))
            .transpose()?,
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    })
}
