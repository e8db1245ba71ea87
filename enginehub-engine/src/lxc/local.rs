//! Local transport: the `lxc` command line tool.

use serde_json::{json, Value};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::translate::{self, ENGINE};
use crate::error::{EngineError, Result};
use crate::types::*;
use crate::units::split_command;

/// Runs `lxc` subcommands and parses their `--format=json` output.
pub(super) struct LocalLxc {
    binary: String,
    timeout: Duration,
    ping_timeout: Duration,
}

impl LocalLxc {
    pub(super) fn new(options: &EngineOptions) -> Self {
        Self {
            binary: options.lxc_binary.clone(),
            timeout: Duration::from_secs(options.request_timeout_secs),
            ping_timeout: Duration::from_secs(options.ping_timeout_secs),
        }
    }

    pub(super) fn binary(&self) -> &str {
        &self.binary
    }

    // =========================================================================
    // Process plumbing
    // =========================================================================

    async fn output(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        debug!(binary = %self.binary, args = ?args, "Running lxc");
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(EngineError::connectivity(
                ENGINE,
                format!("cannot run {}: {}", self.binary, e),
            )),
            Err(_) => Err(EngineError::backend(
                ENGINE,
                args.first().copied().unwrap_or("lxc"),
                format!("timed out after {}s", timeout.as_secs()),
            )),
        }
    }

    /// Run a subcommand; non-zero exit becomes `BackendCall` carrying stderr.
    async fn run(&self, operation: &str, args: &[&str]) -> Result<String> {
        let output = self.output(args, self.timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::backend(ENGINE, operation, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json(&self, operation: &str, args: &[&str]) -> Result<Value> {
        let stdout = self.run(operation, args).await?;
        serde_json::from_str(&stdout).map_err(|e| EngineError::translation(ENGINE, format!("{}: {}", operation, e)))
    }

    async fn instances(&self, filter: Option<&str>) -> Result<Vec<Value>> {
        let mut args = vec!["list"];
        args.extend(filter);
        args.push("--format=json");
        match self.run_json("list", &args).await? {
            Value::Array(items) => Ok(items),
            _ => Err(EngineError::translation(ENGINE, "instance list is not an array")),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub(super) async fn ping(&self) -> Result<()> {
        let output = self.output(&["list", "--format=json"], self.ping_timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::connectivity(
                ENGINE,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// `lxc init`, then one call per setting.
    ///
    /// Settings are applied one by one, so a failure leaves the instance
    /// behind with whatever was applied so far. Every step is attempted and
    /// the failures are reported together.
    pub(super) async fn create(&self, spec: &WorkloadSpec) -> Result<String> {
        let entries = translate::config_entries(spec)?;
        let devices = translate::devices(spec)?;

        self.run("create", &["init", &spec.image, &spec.name]).await?;
        info!(workload = %spec.name, "LXC instance initialised");

        let mut failed_steps = Vec::new();

        for (key, value) in &entries {
            let setting = format!("{}={}", key, value);
            if let Err(e) = self.run("create", &["config", "set", &spec.name, &setting]).await {
                warn!(workload = %spec.name, step = %setting, error = %e, "Configuration step failed");
                failed_steps.push(setting);
            }
        }

        for (device, props) in &devices {
            let kind = props.get("type").map(String::as_str).unwrap_or("none");
            let assignments: Vec<String> = props
                .iter()
                .filter(|(k, _)| k.as_str() != "type")
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            let mut args = vec!["config", "device", "add", spec.name.as_str(), device.as_str(), kind];
            args.extend(assignments.iter().map(String::as_str));
            if let Err(e) = self.run("create", &args).await {
                warn!(workload = %spec.name, device = %device, error = %e, "Device step failed");
                failed_steps.push(format!("device {}", device));
            }
        }

        if let Some(network) = &spec.network {
            if let Err(e) = self.run("create", &["network", "attach", network, &spec.name]).await {
                warn!(workload = %spec.name, network = %network, error = %e, "Network attach failed");
                failed_steps.push(format!("network {}", network));
            }
        }

        if !failed_steps.is_empty() {
            return Err(EngineError::PartiallyApplied {
                engine: ENGINE.to_string(),
                workload: spec.name.clone(),
                failed_steps,
            });
        }
        Ok(spec.name.clone())
    }

    pub(super) async fn lifecycle(&self, action: &str, id: &str, timeout: Option<Duration>) -> Result<bool> {
        let secs = timeout.map(|t| t.as_secs().to_string());
        let mut args = vec![action, id];
        if let Some(secs) = &secs {
            args.extend(["--timeout", secs.as_str()]);
        }
        self.run(action, &args).await?;
        info!(workload = %id, action = %action, "LXC instance lifecycle call succeeded");
        Ok(true)
    }

    pub(super) async fn remove(&self, id: &str, force: bool) -> Result<bool> {
        let mut args = vec!["delete", id];
        if force {
            args.push("--force");
        }
        self.run("remove", &args).await?;
        info!(workload = %id, force, "LXC instance deleted");
        Ok(true)
    }

    pub(super) async fn inspect(&self, id: &str) -> Result<WorkloadSnapshot> {
        // `lxc list NAME` filters by prefix
        self.instances(Some(id))
            .await?
            .iter()
            .find(|i| i.get("name").and_then(Value::as_str) == Some(id))
            .map(translate::instance_snapshot)
            .ok_or_else(|| EngineError::workload_not_found(ENGINE, id))
    }

    pub(super) async fn list(&self, all: bool) -> Result<Vec<WorkloadSnapshot>> {
        Ok(self
            .instances(None)
            .await?
            .iter()
            .map(translate::instance_snapshot)
            .filter(|s| all || s.status == WorkloadStatus::Running)
            .collect())
    }

    pub(super) async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let info = self.run("logs", &["info", id, "--show-log"]).await?;
        let log = info
            .split_once("\nLog:")
            .map(|(_, log)| log)
            .unwrap_or_default();
        Ok(translate::tail_lines(log.trim_start_matches('\n'), tail))
    }

    pub(super) async fn exec(&self, id: &str, command: &str) -> Result<ExecResult> {
        let argv = split_command(ENGINE, command)?;
        let mut args = vec!["exec", id, "--"];
        args.extend(argv.iter().map(String::as_str));

        let output = self.output(&args, self.timeout).await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ExecResult {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            output: text,
        })
    }

    pub(super) async fn pull(&self, image: &str, tag: &str) -> Result<bool> {
        let alias = translate::pull_alias(image, tag);
        let source = format!("images:{}", alias);
        self.run("pull", &["image", "copy", &source, "local:", "--alias", &alias])
            .await?;
        info!(image = %alias, "LXC image copied");
        Ok(true)
    }

    pub(super) async fn images(&self) -> Result<Vec<ImageSnapshot>> {
        let images = self.run_json("images", &["image", "list", "--format=json"]).await?;
        Ok(images
            .as_array()
            .map(|list| list.iter().map(translate::image_snapshot).collect())
            .unwrap_or_default())
    }

    pub(super) async fn rmi(&self, id: &str) -> Result<bool> {
        self.run("rmi", &["image", "delete", id]).await?;
        info!(image = %id, "LXC image deleted");
        Ok(true)
    }

    pub(super) async fn commit(&self, id: &str, repository: &str, tag: &str) -> Result<String> {
        let alias = translate::commit_alias(repository, tag);
        self.run("commit", &["publish", id, "--alias", &alias]).await?;
        info!(workload = %id, image = %alias, "LXC instance published");
        Ok(alias)
    }

    pub(super) async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let kind = format!("--type={}", spec.driver);
        let subnet = spec.subnet.as_ref().map(|s| format!("ipv4.address={}", s));
        let mut args = vec!["network", "create", spec.name.as_str()];
        if spec.driver != "bridge" {
            args.push(&kind);
        }
        args.extend(subnet.as_deref());
        self.run("network-create", &args).await?;
        info!(network = %spec.name, "LXC network created");
        Ok(spec.name.clone())
    }

    pub(super) async fn networks(&self) -> Result<Vec<NetworkSnapshot>> {
        let networks = self
            .run_json("networks", &["network", "list", "--format=json"])
            .await?;
        Ok(networks
            .as_array()
            .map(|list| list.iter().map(translate::network_snapshot).collect())
            .unwrap_or_default())
    }

    pub(super) async fn network_rm(&self, id: &str) -> Result<bool> {
        self.run("network-rm", &["network", "delete", id]).await?;
        info!(network = %id, "LXC network deleted");
        Ok(true)
    }

    pub(super) async fn network_membership(&self, attach: bool, workload: &str, network: &str) -> Result<bool> {
        let (verb, operation) = if attach {
            ("attach", "network-connect")
        } else {
            ("detach", "network-disconnect")
        };
        self.run(operation, &["network", verb, network, workload]).await?;
        info!(workload = %workload, network = %network, action = verb, "LXC network membership changed");
        Ok(true)
    }

    /// `lxc info` prints YAML; lines that are not YAML fall back to `key: value` pairs.
    pub(super) async fn system_info(&self) -> Result<Value> {
        let text = self.run("info", &["info"]).await?;
        Ok(info_to_json(&text))
    }

    pub(super) async fn version(&self) -> Result<Value> {
        let text = self.run("version", &["--version"]).await?;
        Ok(json!({ "version": text.trim() }))
    }
}

fn info_to_json(text: &str) -> Value {
    match serde_yaml::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(
            text.lines()
                .filter_map(|line| line.split_once(':'))
                .map(|(k, v)| (k.trim().to_string(), Value::String(v.trim().to_string())))
                .filter(|(k, _)| !k.is_empty())
                .collect(),
        ),
    }
}
