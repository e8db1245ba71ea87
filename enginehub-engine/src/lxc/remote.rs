//! Remote transport: the LXD REST API.
//!
//! Every response is the LXD envelope `{type, status_code, metadata,
//! operation, error}`. Mutating calls answer `202 Accepted` with an
//! `async` envelope pointing at a background operation.

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::translate::{self, ENGINE};
use super::{DEFAULT_LXD_PORT, DEFAULT_LXD_URL, IMAGE_SERVER};
use crate::error::{EngineError, Result};
use crate::types::*;
use crate::units::split_command;

pub(super) struct RemoteLxd {
    client: Client,
    base: String,
    wait_for_operations: bool,
    operation_timeout: Duration,
    ping_timeout: Duration,
}

impl RemoteLxd {
    pub(super) fn connect(target: &EngineTarget, options: &EngineOptions) -> Result<Self> {
        let base = match target.endpoint() {
            None => DEFAULT_LXD_URL.to_string(),
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => url,
            Some(_) => {
                let target = match target.port {
                    Some(_) => target.clone(),
                    None => target.clone().with_port(DEFAULT_LXD_PORT),
                };
                format!("https://{}", target.endpoint().unwrap_or_default())
            }
        };

        Url::parse(&base).map_err(|e| EngineError::InvalidConfig(format!("LXD URL '{}': {}", base, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| EngineError::connectivity(ENGINE, e))?;

        info!(base = %base, wait_for_operations = options.wait_for_operations, "LXD client configured");

        Ok(Self {
            client,
            base,
            wait_for_operations: options.wait_for_operations,
            operation_timeout: Duration::from_secs(options.operation_timeout_secs),
            ping_timeout: Duration::from_secs(options.ping_timeout_secs),
        })
    }

    pub(super) fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// `{base}/1.0/{segments..}`, each segment percent-encoded.
    fn resource_url(&self, segments: &[&str]) -> Result<Url> {
        let invalid = |reason: String| EngineError::InvalidConfig(format!("LXD URL '{}': {}", self.base, reason));
        let mut url = Url::parse(&self.base).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("1.0")
            .extend(segments);
        Ok(url)
    }

    fn instance_url(&self, id: &str, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["containers", id];
        segments.extend_from_slice(rest);
        self.resource_url(&segments)
    }

    // =========================================================================
    // Envelope handling
    // =========================================================================

    /// Send a request and decode the envelope.
    ///
    /// With `workload` set, a 404 becomes `WorkloadNotFound`.
    async fn send(&self, operation: &str, workload: Option<&str>, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::backend(ENGINE, operation, e))?;
        let status = response.status();
        if let (StatusCode::NOT_FOUND, Some(id)) = (status, workload) {
            return Err(EngineError::workload_not_found(ENGINE, id));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() || body.get("type").and_then(Value::as_str) == Some("error") {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .unwrap_or("no error message");
            return Err(EngineError::backend(
                ENGINE,
                operation,
                format!("HTTP {}: {}", status.as_u16(), reason),
            ));
        }
        Ok(body)
    }

    async fn send_text(&self, operation: &str, workload: Option<&str>, request: RequestBuilder) -> Result<String> {
        let response: Response = request
            .send()
            .await
            .map_err(|e| EngineError::backend(ENGINE, operation, e))?;
        let status = response.status();
        if let (StatusCode::NOT_FOUND, Some(id)) = (status, workload) {
            return Err(EngineError::workload_not_found(ENGINE, id));
        }
        if !status.is_success() {
            return Err(EngineError::backend(ENGINE, operation, format!("HTTP {}", status.as_u16())));
        }
        response
            .text()
            .await
            .map_err(|e| EngineError::backend(ENGINE, operation, e))
    }

    /// Resolve an `async` envelope when configured to wait; otherwise the
    /// `202 Accepted` is taken as success.
    async fn settle(&self, operation: &str, envelope: Value) -> Result<Value> {
        if self.wait_for_operations && envelope.get("type").and_then(Value::as_str) == Some("async") {
            return self.wait_operation(operation, &envelope).await;
        }
        Ok(envelope)
    }

    /// Block on `/1.0/operations/{id}/wait` and fail unless the operation succeeded.
    async fn wait_operation(&self, operation: &str, envelope: &Value) -> Result<Value> {
        let path = envelope
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::translation(ENGINE, format!("{}: async response without operation", operation)))?;
        debug!(operation = %operation, lxd_operation = %path, "Waiting for LXD operation");

        let request = self
            .client
            .get(self.url(&format!("{}/wait", path)))
            .query(&[("timeout", self.operation_timeout.as_secs())])
            .timeout(self.operation_timeout + Duration::from_secs(5));
        let body = self.send(operation, None, request).await?;
        let result = body.get("metadata").cloned().unwrap_or(Value::Null);

        match result.get("status_code").and_then(Value::as_u64) {
            Some(200) => Ok(result),
            code => {
                let reason = result
                    .get("err")
                    .and_then(Value::as_str)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("operation ended with status {:?}", code));
                Err(EngineError::backend(ENGINE, operation, reason))
            }
        }
    }

    async fn metadata_list(&self, operation: &str, path: &str) -> Result<Vec<Value>> {
        let body = self.send(operation, None, self.client.get(self.url(path))).await?;
        match body.get("metadata") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(EngineError::translation(ENGINE, format!("{}: metadata is not a list", operation))),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub(super) async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/1.0"))
            .timeout(self.ping_timeout)
            .send()
            .await
            .map_err(|e| EngineError::connectivity(ENGINE, e))?;
        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(EngineError::connectivity(
                ENGINE,
                format!("GET /1.0 returned HTTP {}", response.status().as_u16()),
            ))
        }
    }

    /// One POST carrying config and devices, so creation is all-or-nothing.
    pub(super) async fn create(&self, spec: &WorkloadSpec) -> Result<String> {
        let config: BTreeMap<String, String> = translate::config_entries(spec)?.into_iter().collect();
        let mut devices = translate::devices(spec)?;
        if let Some(network) = &spec.network {
            let mut nic = translate::nic(network);
            nic.insert("name".to_string(), "eth0".to_string());
            devices.insert("eth0".to_string(), nic);
        }

        let body = json!({
            "name": spec.name,
            "source": {"type": "image", "alias": spec.image},
            "config": config,
            "devices": devices,
        });
        let envelope = self
            .send("create", None, self.client.post(self.url("/1.0/containers")).json(&body))
            .await?;
        self.settle("create", envelope).await?;
        Ok(spec.name.clone())
    }

    pub(super) async fn lifecycle(&self, action: &str, id: &str, timeout: Option<Duration>) -> Result<bool> {
        let mut body = json!({ "action": action, "force": false });
        if let Some(timeout) = timeout {
            body["timeout"] = json!(timeout.as_secs());
        }
        let request = self.client.put(self.instance_url(id, &["state"])?).json(&body);
        let envelope = self.send(action, Some(id), request).await?;
        self.settle(action, envelope).await?;
        info!(workload = %id, action = %action, "LXD instance state change accepted");
        Ok(true)
    }

    /// LXD refuses to delete running instances; `force` stops them first.
    pub(super) async fn remove(&self, id: &str, force: bool) -> Result<bool> {
        if force {
            let request = self
                .client
                .put(self.instance_url(id, &["state"])?)
                .json(&json!({ "action": "stop", "force": true }));
            match self.send("remove", Some(id), request).await {
                Ok(envelope) if envelope.get("operation").is_some() => {
                    self.wait_operation("remove", &envelope).await?;
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Err(e),
                // already stopped
                Err(e) => debug!(workload = %id, error = %e, "Forced stop before delete failed"),
            }
        }
        let envelope = self
            .send("remove", Some(id), self.client.delete(self.instance_url(id, &[])?))
            .await?;
        self.settle("remove", envelope).await?;
        info!(workload = %id, force, "LXD instance deleted");
        Ok(true)
    }

    pub(super) async fn inspect(&self, id: &str) -> Result<WorkloadSnapshot> {
        let body = self
            .send("inspect", Some(id), self.client.get(self.instance_url(id, &[])?))
            .await?;
        let mut instance = body.get("metadata").cloned().unwrap_or(Value::Null);

        let state_request = self.client.get(self.instance_url(id, &["state"])?);
        match self.send("inspect", Some(id), state_request).await {
            Ok(state) => {
                if let (Some(obj), Some(state)) = (instance.as_object_mut(), state.get("metadata")) {
                    obj.insert("state".to_string(), state.clone());
                }
            }
            Err(e) => debug!(workload = %id, error = %e, "Instance state unavailable"),
        }

        Ok(translate::instance_snapshot(&instance))
    }

    pub(super) async fn list(&self, all: bool) -> Result<Vec<WorkloadSnapshot>> {
        Ok(self
            .metadata_list("list", "/1.0/containers?recursion=2")
            .await?
            .iter()
            .map(translate::instance_snapshot)
            .filter(|s| all || s.status == WorkloadStatus::Running)
            .collect())
    }

    pub(super) async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let request = self.client.get(self.instance_url(id, &["logs", "lxc.log"])?);
        let text = self.send_text("logs", Some(id), request).await?;
        Ok(translate::tail_lines(&text, tail))
    }

    /// Exec with recorded output; always waits, the result lives on the operation.
    pub(super) async fn exec(&self, id: &str, command: &str) -> Result<ExecResult> {
        let argv = split_command(ENGINE, command)?;
        let request = self
            .client
            .post(self.instance_url(id, &["exec"])?)
            .json(&json!({
                "command": argv,
                "wait-for-websocket": false,
                "interactive": false,
                "record-output": true,
            }));
        let envelope = self.send("exec", Some(id), request).await?;
        let operation = self.wait_operation("exec", &envelope).await?;

        let exit_code = operation
            .pointer("/metadata/return")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let mut output = String::new();
        for stream in ["1", "2"] {
            let path = operation
                .pointer(&format!("/metadata/output/{}", stream))
                .and_then(Value::as_str);
            if let Some(path) = path {
                output.push_str(&self.send_text("exec", None, self.client.get(self.url(path))).await?);
            }
        }
        Ok(ExecResult { exit_code, output })
    }

    pub(super) async fn pull(&self, image: &str, tag: &str) -> Result<bool> {
        let alias = translate::pull_alias(image, tag);
        let body = json!({
            "source": {
                "type": "image",
                "mode": "pull",
                "server": IMAGE_SERVER,
                "protocol": "simplestreams",
                "alias": alias,
            },
            "aliases": [{ "name": alias }],
        });
        let envelope = self
            .send("pull", None, self.client.post(self.url("/1.0/images")).json(&body))
            .await?;
        self.settle("pull", envelope).await?;
        info!(image = %alias, "LXD image pull accepted");
        Ok(true)
    }

    pub(super) async fn images(&self) -> Result<Vec<ImageSnapshot>> {
        Ok(self
            .metadata_list("images", "/1.0/images?recursion=1")
            .await?
            .iter()
            .map(translate::image_snapshot)
            .collect())
    }

    pub(super) async fn rmi(&self, id: &str) -> Result<bool> {
        let envelope = self
            .send("rmi", None, self.client.delete(self.resource_url(&["images", id])?))
            .await?;
        self.settle("rmi", envelope).await?;
        info!(image = %id, "LXD image deleted");
        Ok(true)
    }

    pub(super) async fn commit(&self, id: &str, repository: &str, tag: &str) -> Result<String> {
        let alias = translate::commit_alias(repository, tag);
        let body = json!({
            "source": { "type": "container", "name": id },
            "aliases": [{ "name": alias }],
        });
        let envelope = self
            .send("commit", Some(id), self.client.post(self.url("/1.0/images")).json(&body))
            .await?;
        self.settle("commit", envelope).await?;
        info!(workload = %id, image = %alias, "LXD instance published");
        Ok(alias)
    }

    pub(super) async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let mut config = Map::new();
        if let Some(subnet) = &spec.subnet {
            config.insert("ipv4.address".to_string(), json!(subnet));
        }
        let body = json!({ "name": spec.name, "type": spec.driver, "config": config });
        let envelope = self
            .send("network-create", None, self.client.post(self.url("/1.0/networks")).json(&body))
            .await?;
        self.settle("network-create", envelope).await?;
        info!(network = %spec.name, "LXD network created");
        Ok(spec.name.clone())
    }

    pub(super) async fn networks(&self) -> Result<Vec<NetworkSnapshot>> {
        Ok(self
            .metadata_list("networks", "/1.0/networks?recursion=1")
            .await?
            .iter()
            .map(translate::network_snapshot)
            .collect())
    }

    pub(super) async fn network_rm(&self, id: &str) -> Result<bool> {
        let request = self.client.delete(self.resource_url(&["networks", id])?);
        let envelope = self.send("network-rm", None, request).await?;
        self.settle("network-rm", envelope).await?;
        info!(network = %id, "LXD network deleted");
        Ok(true)
    }

    /// Adds a NIC device named after the network.
    pub(super) async fn connect_network(&self, workload: &str, network: &str) -> Result<bool> {
        let mut devices = translate::Devices::new();
        devices.insert(network.to_string(), translate::nic(network));
        let body = json!({ "devices": devices });
        let request = self.client.patch(self.instance_url(workload, &[])?).json(&body);
        let envelope = self.send("network-connect", Some(workload), request).await?;
        self.settle("network-connect", envelope).await?;
        info!(workload = %workload, network = %network, "LXD instance attached to network");
        Ok(true)
    }

    /// Drops every NIC on `network` and writes the instance config back.
    pub(super) async fn disconnect_network(&self, workload: &str, network: &str) -> Result<bool> {
        let body = self
            .send("network-disconnect", Some(workload), self.client.get(self.instance_url(workload, &[])?))
            .await?;
        let mut instance = body.get("metadata").cloned().unwrap_or(Value::Null);

        let devices = instance
            .get_mut("devices")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| EngineError::translation(ENGINE, "instance has no devices map"))?;
        let before = devices.len();
        devices.retain(|_, device| {
            !(device.get("type").and_then(Value::as_str) == Some("nic")
                && device.get("network").and_then(Value::as_str) == Some(network))
        });
        if devices.len() == before {
            return Err(EngineError::backend(
                ENGINE,
                "network-disconnect",
                format!("{} is not attached to {}", workload, network),
            ));
        }

        let request = self.client.put(self.instance_url(workload, &[])?).json(&instance);
        let envelope = self.send("network-disconnect", Some(workload), request).await?;
        self.settle("network-disconnect", envelope).await?;
        info!(workload = %workload, network = %network, "LXD instance detached from network");
        Ok(true)
    }

    pub(super) async fn system_info(&self) -> Result<Value> {
        let body = self.send("info", None, self.client.get(self.url("/1.0"))).await?;
        Ok(body.get("metadata").cloned().unwrap_or(Value::Null))
    }

    pub(super) async fn version(&self) -> Result<Value> {
        let info = self.system_info().await?;
        Ok(json!({
            "api_version": info.get("api_version"),
            "server": info.pointer("/environment/server"),
            "server_version": info.pointer("/environment/server_version"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn remote(url: &str, wait: bool) -> RemoteLxd {
        let options = EngineOptions::default().with_wait_for_operations(wait);
        RemoteLxd::connect(&EngineTarget::remote(url), &options).unwrap()
    }

    fn accepted(operation: &str) -> String {
        json!({"type": "async", "status": "Operation created", "status_code": 100, "operation": operation, "metadata": {}})
            .to_string()
    }

    #[test]
    fn test_base_url() {
        let options = EngineOptions::default();
        let base = |target: EngineTarget| RemoteLxd::connect(&target, &options).unwrap().base().to_string();

        assert_eq!(base(EngineTarget::local()), "http://localhost:8443");
        assert_eq!(base(EngineTarget::remote("10.0.0.9")), "https://10.0.0.9:8443");
        assert_eq!(base(EngineTarget::remote("10.0.0.9").with_port(9443)), "https://10.0.0.9:9443");
        assert_eq!(base(EngineTarget::remote("https://lxd.lan:8443")), "https://lxd.lan:8443");
    }

    #[test]
    fn test_resource_paths_are_percent_encoded() {
        let lxd = remote("http://127.0.0.1:8443", false);
        assert_eq!(
            lxd.instance_url("web", &["logs", "lxc.log"]).unwrap().as_str(),
            "http://127.0.0.1:8443/1.0/containers/web/logs/lxc.log"
        );
        assert_eq!(
            lxd.instance_url("a/b c?", &["state"]).unwrap().path(),
            "/1.0/containers/a%2Fb%20c%3F/state"
        );
        assert_eq!(
            lxd.resource_url(&["images", "ubuntu/22.04"]).unwrap().path(),
            "/1.0/images/ubuntu%2F22.04"
        );
    }

    #[tokio::test]
    async fn test_inspect_unknown_instance() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/1.0/containers/ghost")
            .with_status(404)
            .with_body(r#"{"type":"error","error":"Instance not found","error_code":404}"#)
            .create_async()
            .await;

        let err = remote(&server.url(), false).inspect("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::WorkloadNotFound { .. }));
    }

    #[tokio::test]
    async fn test_inspect_merges_state() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/1.0/containers/web")
            .with_status(200)
            .with_body(
                json!({"type": "sync", "status_code": 200, "metadata": {
                    "name": "web", "status": "Running",
                    "config": {"image.os": "Debian", "image.release": "bookworm"},
                    "expanded_devices": {"eth0": {"type": "nic", "network": "lxdbr0"}}
                }})
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/1.0/containers/web/state")
            .with_status(200)
            .with_body(
                json!({"type": "sync", "status_code": 200, "metadata": {
                    "status": "Running",
                    "network": {"eth0": {"addresses": [{"family": "inet", "address": "10.1.1.4"}]}}
                }})
                .to_string(),
            )
            .create_async()
            .await;

        let snap = remote(&server.url(), false).inspect("web").await.unwrap();
        assert_eq!(snap.image, "Debian bookworm");
        assert_eq!(snap.network.as_deref(), Some("lxdbr0"));
        assert_eq!(snap.ip_address.as_deref(), Some("10.1.1.4"));
    }

    #[tokio::test]
    async fn test_create_posts_config_and_devices_in_one_call() {
        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", "/1.0/containers")
            .match_body(Matcher::PartialJson(json!({
                "name": "web",
                "source": {"type": "image", "alias": "ubuntu/22.04"},
                "config": {"limits.cpu.allowance": "150%", "limits.memory": "268435456"},
                "devices": {
                    "eth0": {"type": "nic", "network": "lxdbr0", "name": "eth0"},
                    "proxy-tcp-80": {"type": "proxy", "listen": "tcp:0.0.0.0:8080", "connect": "tcp:127.0.0.1:80"}
                }
            })))
            .with_status(202)
            .with_body(accepted("/1.0/operations/op-create"))
            .create_async()
            .await;

        let spec = WorkloadSpec::new("web", "ubuntu/22.04")
            .with_cpu_limit(1.5)
            .with_memory_limit("256MB")
            .with_port("80/tcp", "8080")
            .with_network("lxdbr0")
            .with_command("nginx -g 'daemon off;'");

        assert_eq!(remote(&server.url(), false).create(&spec).await.unwrap(), "web");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_waiting_reports_failed_operations() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/1.0/containers/web/state")
            .match_body(Matcher::PartialJson(json!({"action": "start"})))
            .with_status(202)
            .with_body(accepted("/1.0/operations/op1"))
            .expect(2)
            .create_async()
            .await;
        let wait = server
            .mock("GET", "/1.0/operations/op1/wait")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"type": "sync", "metadata": {"status_code": 400, "status": "Failure", "err": "Failed to start: no rootfs"}})
                    .to_string(),
            )
            .create_async()
            .await;

        // optimistic by default
        assert!(remote(&server.url(), false).lifecycle("start", "web", None).await.unwrap());

        let err = remote(&server.url(), true).lifecycle("start", "web", None).await.unwrap_err();
        assert!(err.to_string().contains("no rootfs"));
        wait.assert_async().await;
    }

    #[tokio::test]
    async fn test_exec_collects_recorded_output() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/1.0/containers/web/exec")
            .match_body(Matcher::PartialJson(json!({"command": ["ls", "/nope"], "record-output": true})))
            .with_status(202)
            .with_body(accepted("/1.0/operations/op-exec"))
            .create_async()
            .await;
        server
            .mock("GET", "/1.0/operations/op-exec/wait")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"type": "sync", "metadata": {"status_code": 200, "metadata": {
                    "return": 2,
                    "output": {
                        "1": "/1.0/containers/web/logs/exec_1.stdout",
                        "2": "/1.0/containers/web/logs/exec_1.stderr"
                    }
                }}})
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/1.0/containers/web/logs/exec_1.stdout")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;
        server
            .mock("GET", "/1.0/containers/web/logs/exec_1.stderr")
            .with_status(200)
            .with_body("ls: cannot access '/nope'\n")
            .create_async()
            .await;

        let result = remote(&server.url(), false).exec("web", "ls /nope").await.unwrap();
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.output, "ls: cannot access '/nope'\n");
    }

    #[tokio::test]
    async fn test_disconnect_rewrites_devices() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/1.0/containers/web")
            .with_status(200)
            .with_body(
                json!({"type": "sync", "metadata": {"name": "web", "config": {}, "devices": {
                    "backend": {"type": "nic", "network": "backend"},
                    "root": {"type": "disk", "path": "/", "pool": "default"}
                }}})
                .to_string(),
            )
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/1.0/containers/web")
            .match_body(Matcher::PartialJson(json!({"devices": {"root": {"type": "disk"}}})))
            .with_status(202)
            .with_body(accepted("/1.0/operations/op-put"))
            .create_async()
            .await;

        let lxd = remote(&server.url(), false);
        assert!(lxd.disconnect_network("web", "backend").await.unwrap());
        put.assert_async().await;

        assert!(lxd.disconnect_network("web", "frontend").await.is_err());
    }

    #[tokio::test]
    async fn test_version_from_server_environment() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/1.0")
            .with_status(200)
            .with_body(
                json!({"type": "sync", "metadata": {"api_version": "1.0",
                    "environment": {"server": "lxd", "server_version": "5.21.1"}}})
                .to_string(),
            )
            .expect_at_least(2)
            .create_async()
            .await;

        let lxd = remote(&server.url(), false);
        assert!(lxd.ping().await.is_ok());
        let version = lxd.version().await.unwrap();
        assert_eq!(version["server_version"], "5.21.1");
        assert_eq!(version["api_version"], "1.0");
    }
}
