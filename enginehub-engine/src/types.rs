//! Type definitions for engine registration, workload specs and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::EngineError;

// =============================================================================
// ENGINE IDENTITY
// =============================================================================

/// Backend kind an engine registration talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Docker Engine API (unix socket or TCP)
    Docker,
    /// Podman libpod REST API
    Podman,
    /// LXC command line tool or remote LXD REST API
    #[serde(alias = "lxd")]
    Lxc,
}

impl EngineKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
            Self::Lxc => "lxc",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "lxc" | "lxd" => Ok(Self::Lxc),
            other => Err(EngineError::InvalidConfig(format!("unknown engine kind '{}'", other))),
        }
    }
}

/// Where an engine lives.
///
/// `host: None` means "local defaults": the Docker socket, the loopback
/// Podman service, or the local `lxc` binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTarget {
    /// Host, URL or socket path (e.g. `tcp://10.0.0.5:2375`, `unix:///run/podman.sock`)
    pub host: Option<String>,
    /// Port appended to `host` when the host carries none
    pub port: Option<u16>,
}

impl EngineTarget {
    /// Target the local engine.
    pub fn local() -> Self {
        Self::default()
    }

    /// Target a remote engine.
    pub fn remote(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port: None,
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// True when no host was given.
    pub fn is_local(&self) -> bool {
        self.host.as_deref().map_or(true, |h| h.trim().is_empty())
    }

    /// Host joined with the port, if a port was set and the host has none.
    pub fn endpoint(&self) -> Option<String> {
        let host = self.host.as_deref()?.trim().trim_end_matches('/');
        if host.is_empty() {
            return None;
        }
        match self.port {
            Some(port) if !host_has_port(host) => Some(format!("{}:{}", host, port)),
            _ => Some(host.to_string()),
        }
    }
}

impl fmt::Display for EngineTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.endpoint() {
            Some(endpoint) => f.write_str(&endpoint),
            None => f.write_str("local"),
        }
    }
}

fn host_has_port(host: &str) -> bool {
    let authority = host.split("://").last().unwrap_or(host);
    if authority.starts_with('/') {
        // socket path
        return true;
    }
    let authority = authority.split('/').next().unwrap_or(authority);
    authority
        .rsplit_once(':')
        .map_or(false, |(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
}

/// Operating mode of the LXC adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LxcMode {
    /// Drive the local `lxc` command line tool
    #[default]
    Local,
    /// Call a remote LXD REST API
    Remote,
}

/// Per-engine options that do not fit in a [`EngineTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// LXC only: local CLI or remote LXD
    pub lxc_mode: LxcMode,
    /// Path or name of the `lxc` binary
    pub lxc_binary: String,
    /// Timeout applied to each backend request, in seconds
    pub request_timeout_secs: u64,
    /// Timeout for the connectivity probe, in seconds
    pub ping_timeout_secs: u64,
    /// Podman libpod API version used in the path prefix
    pub podman_api_version: String,
    /// Accept self-signed certificates (LXD and HTTPS Podman endpoints)
    pub accept_invalid_certs: bool,
    /// LXD only: wait for async operations to finish instead of trusting `202 Accepted`
    pub wait_for_operations: bool,
    /// LXD only: how long to wait for an async operation, in seconds
    pub operation_timeout_secs: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lxc_mode: LxcMode::Local,
            lxc_binary: "lxc".to_string(),
            request_timeout_secs: 30,
            ping_timeout_secs: 5,
            podman_api_version: "v1.0.0".to_string(),
            accept_invalid_certs: false,
            wait_for_operations: false,
            operation_timeout_secs: 60,
        }
    }
}

impl EngineOptions {
    /// Select the LXC mode.
    pub fn with_lxc_mode(mut self, mode: LxcMode) -> Self {
        self.lxc_mode = mode;
        self
    }

    /// Use a specific `lxc` binary.
    pub fn with_lxc_binary(mut self, binary: impl Into<String>) -> Self {
        self.lxc_binary = binary.into();
        self
    }

    /// Poll LXD operations to completion.
    pub fn with_wait_for_operations(mut self, wait: bool) -> Self {
        self.wait_for_operations = wait;
        self
    }
}

// =============================================================================
// WORKLOAD SPEC
// =============================================================================

/// Restart policy for a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart
    #[default]
    No,
    /// Restart when the main process exits non-zero
    OnFailure,
    /// Always restart
    Always,
    /// Restart unless explicitly stopped
    UnlessStopped,
}

impl RestartPolicy {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::OnFailure => "on-failure",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

/// Immutable request to create a workload.
///
/// Maps are ordered so that the derived backend calls are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSpec {
    /// Workload name, unique within an engine
    pub name: String,
    /// Image reference (`nginx:1.25`, LXC alias `ubuntu/22.04`)
    pub image: String,
    /// `"8080/tcp" -> "80"` or `"8080/tcp" -> "127.0.0.1:80"`
    pub ports: BTreeMap<String, String>,
    /// Host path -> container path
    pub volumes: BTreeMap<String, String>,
    /// Environment variables
    pub environment: BTreeMap<String, String>,
    /// Network to attach to
    pub network: Option<String>,
    /// CPU limit in (fractional) cores
    pub cpu_limit: Option<f64>,
    /// Memory limit as a human-readable size, e.g. `"512MB"`
    pub memory_limit: Option<String>,
    /// Run privileged
    pub privileged: bool,
    /// Host device paths passed through
    pub devices: Vec<String>,
    /// Startup command
    pub command: Option<String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Restart policy
    pub restart_policy: RestartPolicy,
}

impl WorkloadSpec {
    /// Create a new spec with default values.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Publish a container port (`"8080/tcp"`) on a host port or `ip:port` binding.
    pub fn with_port(mut self, container: impl Into<String>, host: impl Into<String>) -> Self {
        self.ports.insert(container.into(), host.into());
        self
    }

    /// Bind-mount a host path.
    pub fn with_volume(mut self, host: impl Into<String>, container: impl Into<String>) -> Self {
        self.volumes.insert(host.into(), container.into());
        self
    }

    /// Set an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Attach to a network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Set the CPU limit in cores.
    pub fn with_cpu_limit(mut self, cores: f64) -> Self {
        self.cpu_limit = Some(cores);
        self
    }

    /// Set the memory limit (`"512MB"`, `"2GB"`).
    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = Some(limit.into());
        self
    }

    /// Run privileged.
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Pass a host device through.
    pub fn with_device(mut self, path: impl Into<String>) -> Self {
        self.devices.push(path.into());
        self
    }

    /// Set the startup command.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the restart policy.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Parse every port entry.
    pub fn port_mappings(&self) -> Result<Vec<PortMapping>, EngineError> {
        self.ports
            .iter()
            .map(|(container, host)| PortMapping::parse(container, host))
            .collect()
    }
}

/// A resolved port binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the workload
    pub container_port: u16,
    /// `tcp` or `udp`
    pub protocol: String,
    /// Host interface, `None` for all interfaces
    pub host_ip: Option<String>,
    /// Host port, `None` when exposed but not published
    pub host_port: Option<u16>,
}

impl PortMapping {
    /// Parse a spec entry: key `"8080/tcp"` (protocol optional), value `"80"`,
    /// `"127.0.0.1:80"` or empty.
    pub fn parse(container: &str, host: &str) -> Result<Self, EngineError> {
        let (port, protocol) = match container.split_once('/') {
            Some((port, proto)) => (port, proto.to_ascii_lowercase()),
            None => (container, "tcp".to_string()),
        };
        let container_port = port.trim().parse::<u16>().map_err(|_| {
            EngineError::InvalidConfig(format!("invalid container port '{}'", container))
        })?;

        let host = host.trim();
        let (host_ip, host_port) = match host.rsplit_once(':') {
            Some((ip, port)) => (non_empty(ip), port),
            None => (None, host),
        };
        let host_port = if host_port.is_empty() {
            None
        } else {
            Some(host_port.parse::<u16>().map_err(|_| {
                EngineError::InvalidConfig(format!("invalid host port '{}'", host))
            })?)
        };

        Ok(Self {
            container_port,
            protocol,
            host_ip,
            host_port,
        })
    }

    /// Key in Docker-compatible maps, e.g. `8080/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Image build request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Build context directory
    pub context: PathBuf,
    /// Tag for the resulting image
    pub tag: String,
    /// Dockerfile path relative to the context
    pub dockerfile: String,
    /// `--build-arg` values
    pub build_args: BTreeMap<String, String>,
}

impl BuildRequest {
    /// Build `context` into `tag` using `Dockerfile`.
    pub fn new(context: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            tag: tag.into(),
            dockerfile: "Dockerfile".to_string(),
            build_args: BTreeMap::new(),
        }
    }

    /// Use a different Dockerfile.
    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    /// Add a build argument.
    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }
}

/// Network creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Network name
    pub name: String,
    /// Driver (`bridge`, `macvlan`, ...)
    pub driver: String,
    /// Optional CIDR subnet
    pub subnet: Option<String>,
}

impl NetworkSpec {
    /// Bridge network with no explicit subnet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: "bridge".to_string(),
            subnet: None,
        }
    }

    /// Set the driver.
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the subnet.
    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = Some(subnet.into());
        self
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Normalized workload status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Created,
    Running,
    Exited,
    Paused,
    #[default]
    Unknown,
}

impl WorkloadStatus {
    /// Map a backend status string onto the common vocabulary.
    pub fn from_backend(status: &str) -> Self {
        let status = status.trim().to_ascii_lowercase();
        match status.as_str() {
            "created" | "configured" | "initialized" => Self::Created,
            "running" | "restarting" | "up" => Self::Running,
            "exited" | "stopped" | "dead" | "removing" | "stopping" => Self::Exited,
            "paused" | "frozen" | "freezing" => Self::Paused,
            // `docker ps` style summaries: "Up 3 hours", "Exited (0) 2 days ago"
            s if s.starts_with("up ") => Self::Running,
            s if s.starts_with("exited") => Self::Exited,
            _ => Self::Unknown,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time resource usage sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage in percent of one core
    pub cpu_percent: f64,
    /// Memory in use, in bytes
    pub memory_bytes: u64,
    /// Memory limit, in bytes, when known
    pub memory_limit_bytes: Option<u64>,
}

/// Normalized read-back of a workload.
///
/// Always fully populated; unknown fields carry their defaults. A snapshot
/// with `diagnostic` set was degraded during translation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: WorkloadStatus,
    pub created: Option<DateTime<Utc>>,
    pub ports: Vec<PortMapping>,
    /// Host path -> container path
    pub volumes: BTreeMap<String, String>,
    pub network: Option<String>,
    pub ip_address: Option<String>,
    pub usage: Option<ResourceUsage>,
    /// Why translation was incomplete
    pub diagnostic: Option<String>,
}

impl WorkloadSnapshot {
    /// Best-effort snapshot for a backend response that could not be translated.
    pub fn degraded(
        id: impl Into<String>,
        name: impl Into<String>,
        status: WorkloadStatus,
        diagnostic: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        Self {
            name: if name.is_empty() { id.clone() } else { name },
            id,
            image: "unknown".to_string(),
            status,
            diagnostic: Some(diagnostic.into()),
            ..Default::default()
        }
    }

    /// True when translation failed and only identity fields are reliable.
    pub fn is_degraded(&self) -> bool {
        self.diagnostic.is_some()
    }

    /// Look up the binding for a container port.
    pub fn port(&self, container_port: u16, protocol: &str) -> Option<&PortMapping> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port && p.protocol.eq_ignore_ascii_case(protocol))
    }
}

/// Normalized read-back of an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    /// Canonical short id (12 chars, no `sha256:` prefix)
    pub id: String,
    pub repository: String,
    pub tag: String,
    /// Human-readable size, e.g. `"72.4MB"`
    pub size: String,
    pub size_bytes: u64,
    pub created: Option<DateTime<Utc>>,
}

/// Normalized read-back of a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: Option<String>,
    pub subnet: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

/// Result of a one-shot command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit status, `-1` when the command could not be run
    pub exit_code: i64,
    /// Combined stdout and stderr
    pub output: String,
}

impl ExecResult {
    /// Command could not be run at all.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            output: reason.into(),
        }
    }

    /// True for exit status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_mapping_parse() {
        let p = PortMapping::parse("8080/tcp", "80").unwrap();
        assert_eq!(p.container_port, 8080);
        assert_eq!(p.protocol, "tcp");
        assert_eq!(p.host_ip, None);
        assert_eq!(p.host_port, Some(80));

        let p = PortMapping::parse("53/UDP", "127.0.0.1:5353").unwrap();
        assert_eq!(p.protocol, "udp");
        assert_eq!(p.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(p.host_port, Some(5353));
        assert_eq!(p.key(), "53/udp");

        let p = PortMapping::parse("9000", "").unwrap();
        assert_eq!(p.protocol, "tcp");
        assert_eq!(p.host_port, None);

        assert!(PortMapping::parse("http/tcp", "80").is_err());
        assert!(PortMapping::parse("80/tcp", "eighty").is_err());
    }

    #[test]
    fn test_status_from_backend() {
        assert_eq!(WorkloadStatus::from_backend("running"), WorkloadStatus::Running);
        assert_eq!(WorkloadStatus::from_backend("Running"), WorkloadStatus::Running);
        assert_eq!(WorkloadStatus::from_backend("Stopped"), WorkloadStatus::Exited);
        assert_eq!(WorkloadStatus::from_backend("dead"), WorkloadStatus::Exited);
        assert_eq!(WorkloadStatus::from_backend("Frozen"), WorkloadStatus::Paused);
        assert_eq!(WorkloadStatus::from_backend("Up 3 hours"), WorkloadStatus::Running);
        assert_eq!(WorkloadStatus::from_backend("Exited (0) 2 days ago"), WorkloadStatus::Exited);
        assert_eq!(WorkloadStatus::from_backend(""), WorkloadStatus::Unknown);
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("Docker".parse::<EngineKind>().unwrap(), EngineKind::Docker);
        assert_eq!("lxd".parse::<EngineKind>().unwrap(), EngineKind::Lxc);
        assert!("rkt".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_target_endpoint() {
        assert_eq!(EngineTarget::local().endpoint(), None);
        assert_eq!(EngineTarget::local().to_string(), "local");
        assert_eq!(
            EngineTarget::remote("10.0.0.5").with_port(2375).endpoint().as_deref(),
            Some("10.0.0.5:2375")
        );
        assert_eq!(
            EngineTarget::remote("tcp://10.0.0.5:2376").with_port(2375).endpoint().as_deref(),
            Some("tcp://10.0.0.5:2376")
        );
        assert_eq!(
            EngineTarget::remote("unix:///run/podman/podman.sock").with_port(80).endpoint().as_deref(),
            Some("unix:///run/podman/podman.sock")
        );
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let yaml = r#"
name: web
image: nginx:1.25
ports:
  "8080/tcp": "80"
memory_limit: 512MB
restart_policy: unless-stopped
"#;
        let spec: WorkloadSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.restart_policy, RestartPolicy::UnlessStopped);
        assert!(spec.environment.is_empty());
        assert!(!spec.privileged);
        assert_eq!(spec.port_mappings().unwrap()[0].host_port, Some(80));
    }

    #[test]
    fn test_degraded_snapshot_keeps_identity() {
        let snap = WorkloadSnapshot::degraded("abc123", "", WorkloadStatus::Unknown, "bad json");
        assert_eq!(snap.name, "abc123");
        assert_eq!(snap.image, "unknown");
        assert!(snap.is_degraded());
    }
}
