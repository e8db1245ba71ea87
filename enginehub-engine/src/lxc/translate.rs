//! Spec translation and response normalization shared by both LXC transports.
//!
//! `lxc ... --format=json` prints the same objects the REST API returns in
//! `metadata`, so one set of normalizers serves both.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::normalize::{parse_timestamp, str_field, u64_field};
use crate::types::*;
use crate::units::{format_size, parse_memory_limit, short_id};

pub(super) const ENGINE: &str = "lxc";

/// Device name -> properties, `type` included.
pub(super) type Devices = BTreeMap<String, BTreeMap<String, String>>;

// =============================================================================
// SPEC -> LXD
// =============================================================================

/// Instance config keys for a spec, in application order.
pub(super) fn config_entries(spec: &WorkloadSpec) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();

    if let Some(cores) = spec.cpu_limit {
        entries.push(cpu_entry(cores)?);
    }
    if let Some(memory) = &spec.memory_limit {
        let bytes = parse_memory_limit(memory).map_err(|e| EngineError::translation(ENGINE, e))?;
        entries.push(("limits.memory".to_string(), bytes.to_string()));
    }
    for (key, value) in &spec.environment {
        entries.push((format!("environment.{}", key), value.clone()));
    }
    if spec.privileged {
        entries.push(("security.privileged".to_string(), "true".to_string()));
    }
    if spec.restart_policy != RestartPolicy::No {
        entries.push(("boot.autostart".to_string(), "true".to_string()));
    }

    Ok(entries)
}

/// Whole cores map to `limits.cpu`, fractions to a CFS allowance percentage.
fn cpu_entry(cores: f64) -> Result<(String, String)> {
    if !cores.is_finite() || cores <= 0.0 {
        return Err(EngineError::translation(ENGINE, format!("invalid cpu limit {}", cores)));
    }
    if cores.fract() == 0.0 {
        Ok(("limits.cpu".to_string(), format!("{}", cores as u64)))
    } else {
        Ok((
            "limits.cpu.allowance".to_string(),
            format!("{}%", (cores * 100.0).round() as u64),
        ))
    }
}

/// Devices for passthrough, bind mounts and published ports.
pub(super) fn devices(spec: &WorkloadSpec) -> Result<Devices> {
    let mut devices = Devices::new();

    for path in &spec.devices {
        devices.insert(
            format!("dev-{}", device_suffix(path)),
            props(&[("type", "unix-char"), ("path", path)]),
        );
    }

    for (source, target) in &spec.volumes {
        devices.insert(
            format!("mount-{}", device_suffix(target)),
            props(&[("type", "disk"), ("source", source), ("path", target)]),
        );
    }

    let ports = spec.port_mappings().map_err(|e| EngineError::translation(ENGINE, e))?;
    for port in ports {
        let host_port = port.host_port.unwrap_or(port.container_port);
        let listen = format!(
            "{}:{}:{}",
            port.protocol,
            port.host_ip.as_deref().unwrap_or("0.0.0.0"),
            host_port
        );
        let connect = format!("{}:127.0.0.1:{}", port.protocol, port.container_port);
        devices.insert(
            format!("proxy-{}-{}", port.protocol, port.container_port),
            props(&[("type", "proxy"), ("listen", &listen), ("connect", &connect)]),
        );
    }

    Ok(devices)
}

/// NIC device attaching an instance to a managed network.
pub(super) fn nic(network: &str) -> BTreeMap<String, String> {
    props(&[("type", "nic"), ("network", network)])
}

/// Spec fields a system container cannot honour.
pub(super) fn ignored_fields(spec: &WorkloadSpec) -> Vec<&'static str> {
    let mut ignored = Vec::new();
    if spec.command.is_some() {
        ignored.push("command");
    }
    if spec.working_dir.is_some() {
        ignored.push("working_dir");
    }
    if spec.user.is_some() {
        ignored.push("user");
    }
    ignored
}

/// Image server alias: `ubuntu` + `22.04` -> `ubuntu/22.04`.
pub(super) fn pull_alias(image: &str, tag: &str) -> String {
    if tag.is_empty() || tag == "latest" {
        image.to_string()
    } else {
        format!("{}/{}", image, tag)
    }
}

/// Alias a committed instance is published under.
pub(super) fn commit_alias(repository: &str, tag: &str) -> String {
    format!("{}_{}", repository, tag)
}

fn device_suffix(path: &str) -> String {
    let cleaned: String = path
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "root".to_string()
    } else {
        cleaned
    }
}

fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// LXD -> SNAPSHOTS
// =============================================================================

/// Snapshot from an instance object (`lxc list --format=json` entry or REST metadata).
pub(super) fn instance_snapshot(value: &Value) -> WorkloadSnapshot {
    match try_instance_snapshot(value) {
        Ok(snapshot) => snapshot,
        Err(reason) => {
            let name = str_field(value, &["name"]).unwrap_or_else(|| "unknown".to_string());
            let status = str_field(value, &["status"])
                .map(|s| WorkloadStatus::from_backend(&s))
                .unwrap_or_default();
            tracing::warn!(engine = ENGINE, workload = %name, reason = %reason, "Returning degraded workload snapshot");
            WorkloadSnapshot::degraded(name.clone(), name, status, reason)
        }
    }
}

fn try_instance_snapshot(value: &Value) -> std::result::Result<WorkloadSnapshot, String> {
    if !value.is_object() {
        return Err("instance payload is not an object".to_string());
    }
    let name = str_field(value, &["name"]).ok_or_else(|| "missing name".to_string())?;

    let config = value.get("config");
    let image = config
        .and_then(|c| str_field(c, &["image.description"]))
        .or_else(|| {
            let os = config.and_then(|c| str_field(c, &["image.os"]))?;
            let release = config.and_then(|c| str_field(c, &["image.release"])).unwrap_or_default();
            Some(format!("{} {}", os, release).trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let devices = value
        .get("expanded_devices")
        .or_else(|| value.get("devices"))
        .and_then(Value::as_object);

    let mut ports = Vec::new();
    let mut volumes = BTreeMap::new();
    let mut network = None;
    if let Some(devices) = devices {
        for (device, props) in devices {
            match props.get("type").and_then(Value::as_str) {
                Some("proxy") => ports.push(proxy_port(device, props)?),
                Some("disk") => {
                    if let (Some(source), Some(path)) = (
                        props.get("source").and_then(Value::as_str),
                        props.get("path").and_then(Value::as_str),
                    ) {
                        volumes.insert(source.to_string(), path.to_string());
                    }
                }
                Some("nic") if network.is_none() => {
                    network = str_field(props, &["network", "parent"]);
                }
                _ => {}
            }
        }
    }

    let (interface, ip_address) = instance_address(value);

    Ok(WorkloadSnapshot {
        id: name.clone(),
        name,
        image,
        status: str_field(value, &["status"])
            .map(|s| WorkloadStatus::from_backend(&s))
            .unwrap_or_default(),
        created: value.get("created_at").and_then(parse_timestamp),
        ports,
        volumes,
        network: network.or(interface),
        ip_address,
        usage: instance_usage(value),
        diagnostic: None,
    })
}

/// `listen: tcp:0.0.0.0:80`, `connect: tcp:127.0.0.1:8080`.
fn proxy_port(device: &str, props: &Value) -> std::result::Result<PortMapping, String> {
    let listen = props.get("listen").and_then(Value::as_str).unwrap_or_default();
    let connect = props.get("connect").and_then(Value::as_str).unwrap_or_default();

    let (protocol, listen_addr) = listen
        .split_once(':')
        .ok_or_else(|| format!("proxy device {} has malformed listen '{}'", device, listen))?;
    let (listen_ip, listen_port) = listen_addr
        .rsplit_once(':')
        .ok_or_else(|| format!("proxy device {} has malformed listen '{}'", device, listen))?;
    let container_port = connect
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        .ok_or_else(|| format!("proxy device {} has malformed connect '{}'", device, connect))?;
    let host_port = listen_port
        .parse::<u16>()
        .map_err(|_| format!("proxy device {} has malformed listen '{}'", device, listen))?;

    Ok(PortMapping {
        container_port,
        protocol: protocol.to_string(),
        host_ip: Some(listen_ip.to_string()).filter(|ip| ip != "0.0.0.0" && !ip.is_empty()),
        host_port: Some(host_port),
    })
}

/// First non-loopback interface with an IPv4 address.
fn instance_address(value: &Value) -> (Option<String>, Option<String>) {
    let Some(interfaces) = value.pointer("/state/network").and_then(Value::as_object) else {
        return (None, None);
    };
    for (name, iface) in interfaces {
        if name == "lo" {
            continue;
        }
        let address = iface
            .get("addresses")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|a| a.get("family").and_then(Value::as_str) == Some("inet"))
            .and_then(|a| str_field(a, &["address"]));
        if address.is_some() {
            return (Some(name.clone()), address);
        }
    }
    (None, None)
}

fn instance_usage(value: &Value) -> Option<ResourceUsage> {
    let memory_bytes = value.pointer("/state/memory/usage").and_then(Value::as_u64)?;
    Some(ResourceUsage {
        cpu_percent: 0.0,
        memory_bytes,
        memory_limit_bytes: value
            .pointer("/config/limits.memory")
            .and_then(Value::as_str)
            .and_then(|l| parse_memory_limit(l).ok()),
    })
}

/// Snapshot from an image object.
pub(super) fn image_snapshot(value: &Value) -> ImageSnapshot {
    let alias = value
        .pointer("/aliases/0/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let (repository, tag) = match alias.split_once('/') {
        Some((repository, tag)) => (repository.to_string(), tag.to_string()),
        None => (alias.to_string(), "latest".to_string()),
    };
    let size_bytes = u64_field(value, &["size"]).unwrap_or(0);

    ImageSnapshot {
        id: short_id(&str_field(value, &["fingerprint"]).unwrap_or_else(|| "unknown".to_string())),
        repository,
        tag,
        size: format_size(size_bytes),
        size_bytes,
        created: value.get("created_at").and_then(parse_timestamp),
    }
}

/// Snapshot from a network object.
pub(super) fn network_snapshot(value: &Value) -> NetworkSnapshot {
    let name = str_field(value, &["name"]).unwrap_or_default();
    let managed = value.get("managed").and_then(Value::as_bool).unwrap_or(false);
    NetworkSnapshot {
        id: name.clone(),
        name,
        driver: str_field(value, &["type"]).unwrap_or_else(|| "unknown".to_string()),
        scope: Some(if managed { "managed" } else { "host" }.to_string()),
        subnet: value
            .pointer("/config/ipv4.address")
            .and_then(Value::as_str)
            .filter(|s| *s != "none" && !s.is_empty())
            .map(str::to_string),
        created: None,
    }
}

/// Last `n` lines of `text`.
pub(super) fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    let mut out = lines[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}
