//! Normalization of Docker-compatible JSON into snapshots.
//!
//! Docker inspect/list responses (serialized from the `bollard` models) and
//! Podman libpod responses share the same PascalCase shape with small
//! variations: `Name` vs `Names`, `State` as object or string, ports as a
//! map or an array, `Created` as RFC 3339 or unix seconds. Everything here
//! works on `serde_json::Value` so both adapters go through one code path.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::types::{
    ImageSnapshot, NetworkSnapshot, PortMapping, ResourceUsage, WorkloadSnapshot, WorkloadStatus,
};
use crate::units::{format_size, short_id, split_image_reference};

// =============================================================================
// WORKLOADS
// =============================================================================

/// Build a snapshot from an inspect or list entry.
///
/// Never fails: when the payload cannot be translated the result is a
/// degraded snapshot with a diagnostic.
pub fn workload_snapshot(engine: &str, value: &Value) -> WorkloadSnapshot {
    match try_workload_snapshot(value) {
        Ok(snapshot) => snapshot,
        Err(reason) => {
            let id = str_field(value, &["Id", "id", "ID"]).unwrap_or_default();
            let name = workload_name(value).unwrap_or_default();
            warn!(engine = %engine, workload = %id, reason = %reason, "Returning degraded workload snapshot");
            WorkloadSnapshot::degraded(
                if id.is_empty() { "unknown".to_string() } else { id },
                name,
                workload_status(value),
                reason,
            )
        }
    }
}

fn try_workload_snapshot(value: &Value) -> Result<WorkloadSnapshot, String> {
    let obj = value.as_object().ok_or_else(|| "payload is not an object".to_string())?;
    let id = str_field(value, &["Id", "ID", "id"]).ok_or_else(|| "missing Id".to_string())?;

    let image = value
        .pointer("/Config/Image")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| str_field(value, &["ImageName", "Image"]))
        .unwrap_or_else(|| "unknown".to_string());

    let ports = workload_ports(value)?;

    let mut volumes = BTreeMap::new();
    if let Some(mounts) = obj.get("Mounts").and_then(Value::as_array) {
        for mount in mounts {
            let kind = mount.get("Type").and_then(Value::as_str).unwrap_or_default();
            if !kind.eq_ignore_ascii_case("bind") {
                continue;
            }
            if let (Some(src), Some(dst)) = (
                mount.get("Source").and_then(Value::as_str),
                mount.get("Destination").and_then(Value::as_str),
            ) {
                volumes.insert(src.to_string(), dst.to_string());
            }
        }
    }

    let (network, ip_address) = workload_network(value);

    Ok(WorkloadSnapshot {
        name: workload_name(value).unwrap_or_else(|| id.clone()),
        id,
        image,
        status: workload_status(value),
        created: obj.get("Created").and_then(parse_timestamp),
        ports,
        volumes,
        network,
        ip_address,
        usage: None,
        diagnostic: None,
    })
}

fn workload_name(value: &Value) -> Option<String> {
    let name = match value.get("Names").and_then(Value::as_array) {
        Some(names) => names.first().and_then(Value::as_str).map(str::to_string),
        None => str_field(value, &["Name", "name"]),
    }?;
    Some(name.trim_start_matches('/').to_string())
}

fn workload_status(value: &Value) -> WorkloadStatus {
    match value.get("State") {
        Some(Value::Object(state)) => state
            .get("Status")
            .and_then(Value::as_str)
            .map(WorkloadStatus::from_backend)
            .unwrap_or_default(),
        Some(Value::String(state)) => WorkloadStatus::from_backend(state),
        _ => value
            .get("Status")
            .and_then(Value::as_str)
            .map(WorkloadStatus::from_backend)
            .unwrap_or_default(),
    }
}

fn workload_ports(value: &Value) -> Result<Vec<PortMapping>, String> {
    let mut ports = Vec::new();

    // Inspect form: {"80/tcp": [{"HostIp": "", "HostPort": "8080"}] | null}
    if let Some(map) = value.pointer("/NetworkSettings/Ports").and_then(Value::as_object) {
        for (key, bindings) in map {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let container_port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port key '{}'", key))?;
            let bindings = bindings.as_array().cloned().unwrap_or_default();
            if bindings.is_empty() {
                ports.push(PortMapping {
                    container_port,
                    protocol: protocol.to_string(),
                    host_ip: None,
                    host_port: None,
                });
            }
            for binding in bindings {
                let host_port = match binding.get("HostPort").and_then(Value::as_str) {
                    Some(p) if !p.is_empty() => Some(
                        p.parse::<u16>()
                            .map_err(|_| format!("invalid host port '{}' for {}", p, key))?,
                    ),
                    _ => None,
                };
                ports.push(PortMapping {
                    container_port,
                    protocol: protocol.to_string(),
                    host_ip: binding
                        .get("HostIp")
                        .and_then(Value::as_str)
                        .filter(|ip| !ip.is_empty())
                        .map(str::to_string),
                    host_port,
                });
            }
        }
        return Ok(ports);
    }

    // List form: Docker `PrivatePort/PublicPort/Type/IP` or libpod
    // `container_port/host_port/protocol/host_ip`.
    if let Some(list) = value.get("Ports").and_then(Value::as_array) {
        for entry in list {
            let container_port = u64_field(entry, &["PrivatePort", "container_port"])
                .ok_or_else(|| "port entry without container port".to_string())?;
            ports.push(PortMapping {
                container_port: u16::try_from(container_port)
                    .map_err(|_| format!("port {} out of range", container_port))?,
                protocol: str_field(entry, &["Type", "protocol"]).unwrap_or_else(|| "tcp".to_string()),
                host_ip: str_field(entry, &["IP", "host_ip"]).filter(|ip| !ip.is_empty()),
                host_port: u64_field(entry, &["PublicPort", "host_port"])
                    .and_then(|p| u16::try_from(p).ok())
                    .filter(|p| *p != 0),
            });
        }
    }

    Ok(ports)
}

fn workload_network(value: &Value) -> (Option<String>, Option<String>) {
    let settings = value.get("NetworkSettings");
    if let Some(networks) = settings
        .and_then(|s| s.get("Networks"))
        .and_then(Value::as_object)
    {
        if let Some((name, endpoint)) = networks.iter().next() {
            let ip = endpoint
                .get("IPAddress")
                .and_then(Value::as_str)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string);
            return (Some(name.clone()), ip);
        }
    }

    // libpod list entries carry a plain list of network names
    let network = value
        .get("Networks")
        .and_then(Value::as_array)
        .and_then(|n| n.first())
        .and_then(Value::as_str)
        .map(str::to_string);
    let ip = settings
        .and_then(|s| s.get("IPAddress"))
        .and_then(Value::as_str)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);
    (network, ip)
}

// =============================================================================
// IMAGES & NETWORKS
// =============================================================================

/// Build an image snapshot from a Docker/libpod image list entry.
pub fn image_snapshot(value: &Value) -> ImageSnapshot {
    let id = str_field(value, &["Id", "ID", "id"]).unwrap_or_else(|| "unknown".to_string());

    let repo_tag = value
        .get("RepoTags")
        .and_then(Value::as_array)
        .and_then(|tags| tags.first())
        .and_then(Value::as_str)
        .filter(|tag| *tag != "<none>:<none>");
    let (repository, tag) = match repo_tag {
        Some(reference) => split_image_reference(reference),
        None => ("<none>".to_string(), "<none>".to_string()),
    };

    let size_bytes = u64_field(value, &["Size", "size"]).unwrap_or(0);

    ImageSnapshot {
        id: short_id(&id),
        repository,
        tag,
        size: format_size(size_bytes),
        size_bytes,
        created: value.get("Created").and_then(parse_timestamp),
    }
}

/// Build a network snapshot from a Docker or libpod network entry.
pub fn network_snapshot(value: &Value) -> NetworkSnapshot {
    let subnet = value
        .pointer("/IPAM/Config/0/Subnet")
        .and_then(Value::as_str)
        .or_else(|| value.pointer("/subnets/0/subnet").and_then(Value::as_str))
        .map(str::to_string);

    NetworkSnapshot {
        id: str_field(value, &["Id", "id", "ID"]).unwrap_or_default(),
        name: str_field(value, &["Name", "name"]).unwrap_or_default(),
        driver: str_field(value, &["Driver", "driver"]).unwrap_or_else(|| "unknown".to_string()),
        scope: str_field(value, &["Scope", "scope"]),
        subnet,
        created: value
            .get("Created")
            .or_else(|| value.get("created"))
            .and_then(parse_timestamp),
    }
}

/// CPU/memory sample from a Docker-compatible one-shot stats payload.
pub fn usage_from_stats(stats: &Value) -> Option<ResourceUsage> {
    let memory_bytes = stats.pointer("/memory_stats/usage").and_then(Value::as_u64)?;
    let memory_limit_bytes = stats
        .pointer("/memory_stats/limit")
        .and_then(Value::as_u64)
        .filter(|l| *l > 0);

    let total = stats.pointer("/cpu_stats/cpu_usage/total_usage").and_then(Value::as_u64);
    let pre_total = stats.pointer("/precpu_stats/cpu_usage/total_usage").and_then(Value::as_u64);
    let system = stats.pointer("/cpu_stats/system_cpu_usage").and_then(Value::as_u64);
    let pre_system = stats.pointer("/precpu_stats/system_cpu_usage").and_then(Value::as_u64);
    let cpus = stats
        .pointer("/cpu_stats/online_cpus")
        .and_then(Value::as_u64)
        .filter(|c| *c > 0)
        .unwrap_or(1);

    let cpu_percent = match (total, pre_total, system, pre_system) {
        (Some(t), Some(pt), Some(s), Some(ps)) if s > ps && t >= pt => {
            (t - pt) as f64 / (s - ps) as f64 * cpus as f64 * 100.0
        }
        _ => 0.0,
    };

    Some(ResourceUsage {
        cpu_percent,
        memory_bytes,
        memory_limit_bytes,
    })
}

// =============================================================================
// HELPERS
// =============================================================================

/// Parse an RFC 3339 string or unix-seconds integer.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .filter(|t| t.timestamp() > 0),
        Value::Number(n) => n
            .as_i64()
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Decode a Docker-style multiplexed stream into text.
///
/// Each frame starts with an 8 byte header: stream type (0 stdin, 1 stdout,
/// 2 stderr), three zero bytes and a big-endian payload length. Payloads
/// that are not framed (TTY workloads) are returned as-is.
pub fn demux_stream(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;

    while !rest.is_empty() {
        let framed = rest.len() >= 8 && rest[0] <= 2 && rest[1..4] == [0, 0, 0];
        if !framed {
            out.extend_from_slice(rest);
            break;
        }
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }

    String::from_utf8_lossy(&out).into_owned()
}

pub(crate) fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

pub(crate) fn u64_field(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_docker_inspect_payload() {
        let payload = json!({
            "Id": "f00dbeef",
            "Name": "/web",
            "Created": "2024-05-01T10:00:00.123456789Z",
            "State": {"Status": "running", "Running": true},
            "Image": "sha256:aaaa",
            "Config": {"Image": "nginx:1.25"},
            "Mounts": [
                {"Type": "bind", "Source": "/srv/www", "Destination": "/usr/share/nginx/html"},
                {"Type": "volume", "Source": "/var/lib/docker/volumes/x", "Destination": "/data"}
            ],
            "NetworkSettings": {
                "Ports": {
                    "80/tcp": [{"HostIp": "", "HostPort": "8080"}],
                    "443/tcp": null
                },
                "Networks": {"frontend": {"IPAddress": "172.18.0.2"}}
            }
        });

        let snap = workload_snapshot("docker", &payload);
        assert!(!snap.is_degraded());
        assert_eq!(snap.name, "web");
        assert_eq!(snap.image, "nginx:1.25");
        assert_eq!(snap.status, WorkloadStatus::Running);
        assert!(snap.created.is_some());
        assert_eq!(snap.port(80, "tcp").unwrap().host_port, Some(8080));
        assert_eq!(snap.port(80, "tcp").unwrap().host_ip, None);
        assert_eq!(snap.port(443, "tcp").unwrap().host_port, None);
        assert_eq!(snap.volumes.len(), 1);
        assert_eq!(snap.volumes["/srv/www"], "/usr/share/nginx/html");
        assert_eq!(snap.network.as_deref(), Some("frontend"));
        assert_eq!(snap.ip_address.as_deref(), Some("172.18.0.2"));
    }

    #[test]
    fn test_libpod_list_payload() {
        let payload = json!({
            "Id": "c0ffee",
            "Names": ["api"],
            "Image": "docker.io/library/python:3.12",
            "State": "exited",
            "Created": 1714557600,
            "Ports": [{"host_ip": "", "container_port": 5000, "host_port": 5000, "protocol": "tcp"}],
            "Networks": ["podman"]
        });

        let snap = workload_snapshot("podman", &payload);
        assert_eq!(snap.name, "api");
        assert_eq!(snap.status, WorkloadStatus::Exited);
        assert_eq!(snap.created.unwrap().timestamp(), 1714557600);
        assert_eq!(snap.port(5000, "tcp").unwrap().host_port, Some(5000));
        assert_eq!(snap.network.as_deref(), Some("podman"));
    }

    #[test]
    fn test_untranslatable_payload_degrades() {
        let payload = json!({
            "Id": "deadbeef",
            "Name": "/broken",
            "State": {"Status": "paused"},
            "NetworkSettings": {"Ports": {"eighty/tcp": []}}
        });

        let snap = workload_snapshot("docker", &payload);
        assert!(snap.is_degraded());
        assert_eq!(snap.id, "deadbeef");
        assert_eq!(snap.name, "broken");
        assert_eq!(snap.status, WorkloadStatus::Paused);
        assert!(snap.diagnostic.unwrap().contains("eighty/tcp"));

        let snap = workload_snapshot("docker", &json!("not an object"));
        assert_eq!(snap.id, "unknown");
        assert_eq!(snap.status, WorkloadStatus::Unknown);
    }

    #[test]
    fn test_image_snapshot() {
        let payload = json!({
            "Id": "sha256:0123456789abcdef",
            "RepoTags": ["registry.local:5000/app:v2"],
            "Size": 75917312,
            "Created": 1714557600
        });
        let image = image_snapshot(&payload);
        assert_eq!(image.id, "0123456789ab");
        assert_eq!(image.repository, "registry.local:5000/app");
        assert_eq!(image.tag, "v2");
        assert_eq!(image.size, "72.4MB");

        let dangling = image_snapshot(&json!({"Id": "sha256:ffff", "RepoTags": ["<none>:<none>"]}));
        assert_eq!(dangling.repository, "<none>");
        assert_eq!(dangling.size, "0.0MB");
    }

    #[test]
    fn test_network_snapshot_both_shapes() {
        let docker = json!({
            "Id": "n1", "Name": "backend", "Driver": "bridge", "Scope": "local",
            "IPAM": {"Config": [{"Subnet": "10.10.0.0/24"}]}
        });
        let podman = json!({
            "id": "n2", "name": "pods", "driver": "bridge",
            "subnets": [{"subnet": "10.88.0.0/16", "gateway": "10.88.0.1"}],
            "created": "2024-05-01T10:00:00Z"
        });
        assert_eq!(network_snapshot(&docker).subnet.as_deref(), Some("10.10.0.0/24"));
        let pods = network_snapshot(&podman);
        assert_eq!(pods.name, "pods");
        assert_eq!(pods.subnet.as_deref(), Some("10.88.0.0/16"));
        assert!(pods.created.is_some());
    }

    #[test]
    fn test_usage_from_stats() {
        let stats = json!({
            "cpu_stats": {"cpu_usage": {"total_usage": 2_000_000}, "system_cpu_usage": 20_000_000, "online_cpus": 2},
            "precpu_stats": {"cpu_usage": {"total_usage": 1_000_000}, "system_cpu_usage": 10_000_000},
            "memory_stats": {"usage": 52_428_800, "limit": 536_870_912}
        });
        let usage = usage_from_stats(&stats).unwrap();
        assert!((usage.cpu_percent - 20.0).abs() < 1e-9);
        assert_eq!(usage.memory_bytes, 52_428_800);
        assert_eq!(usage.memory_limit_bytes, Some(536_870_912));
        assert!(usage_from_stats(&json!({})).is_none());
    }

    #[test]
    fn test_demux_stream() {
        let mut raw = vec![1, 0, 0, 0, 0, 0, 0, 6];
        raw.extend_from_slice(b"hello\n");
        raw.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 5]);
        raw.extend_from_slice(b"oops\n");
        assert_eq!(demux_stream(&raw), "hello\noops\n");
        assert_eq!(demux_stream(b"plain tty output"), "plain tty output");
    }

    #[test]
    fn test_docker_zero_time_is_unknown() {
        assert!(parse_timestamp(&json!("0001-01-01T00:00:00Z")).is_none());
        assert!(parse_timestamp(&json!(0)).is_none());
    }
}
