//! Podman backend implementation.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::DEFAULT_PODMAN_URL;
use crate::archive::tar_build_context;
use crate::error::{EngineError, Result};
use crate::normalize;
use crate::traits::{caught, caught_exec, ContainerEngine};
use crate::types::*;
use crate::units::{cpu_quota, parse_memory_limit, split_command};

const KIND: EngineKind = EngineKind::Podman;

/// Podman libpod REST API backend.
pub struct PodmanEngine {
    client: Client,
    api_base: String,
    ping_timeout: Duration,
}

impl PodmanEngine {
    /// Build a client for the target. Does not contact the service.
    pub fn connect(target: &EngineTarget, options: &EngineOptions) -> Result<Self> {
        let host = match target.endpoint() {
            None => DEFAULT_PODMAN_URL.to_string(),
            Some(endpoint) if endpoint.starts_with("unix://") || endpoint.starts_with('/') => {
                return Err(EngineError::InvalidConfig(format!(
                    "podman endpoint {} is a unix socket; expose the API over TCP instead",
                    endpoint
                )));
            }
            Some(endpoint) if endpoint.starts_with("http") => endpoint,
            Some(endpoint) => format!("http://{}", endpoint),
        };
        let api_base = format!("{}/{}/libpod", host, options.podman_api_version);

        let client = Client::builder()
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| EngineError::connectivity(KIND.as_str(), e))?;

        info!(api_base = %api_base, "Podman client configured");

        Ok(Self {
            client,
            api_base,
            ping_timeout: Duration::from_secs(options.ping_timeout_secs),
        })
    }

    /// Base URL every request is built from.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Send a request and turn non-success statuses into `BackendCall` errors.
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::backend(KIND.as_str(), operation, e))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::backend(
            KIND.as_str(),
            operation,
            format!("HTTP {}: {}", status.as_u16(), error_message(&body)),
        ))
    }

    /// Like [`send`](Self::send) but maps 404 to `WorkloadNotFound`.
    async fn send_for_workload(&self, operation: &str, id: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::backend(KIND.as_str(), operation, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::workload_not_found(KIND.as_str(), id));
        }
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::backend(
            KIND.as_str(),
            operation,
            format!("HTTP {}: {}", status.as_u16(), error_message(&body)),
        ))
    }

    async fn json(operation: &str, response: Response) -> Result<Value> {
        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::translation(KIND.as_str(), format!("{}: {}", operation, e)))
    }

    // =========================================================================
    // Fallible operations behind the soft trait methods
    // =========================================================================

    async fn lifecycle(&self, operation: &str, id: &str, timeout: Option<Duration>) -> Result<bool> {
        let mut request = self.client.post(self.url(&format!("containers/{}/{}", id, operation)));
        if let Some(timeout) = timeout {
            request = request.query(&[("t", timeout.as_secs().to_string())]);
        }
        self.send_for_workload(operation, id, request).await?;
        info!(workload = %id, operation = %operation, "Podman container lifecycle call succeeded");
        Ok(true)
    }

    async fn remove(&self, id: &str, force: bool) -> Result<bool> {
        let request = self
            .client
            .delete(self.url(&format!("containers/{}", id)))
            .query(&[("force", force.to_string())]);
        self.send_for_workload("remove", id, request).await?;
        info!(workload = %id, force, "Podman container removed");
        Ok(true)
    }

    async fn sample_usage(&self, id: &str) -> Option<ResourceUsage> {
        let request = self
            .client
            .get(self.url("containers/stats"))
            .query(&[("containers", id), ("stream", "false")]);
        let response = self.send("stats", request).await.ok()?;
        let stats = Self::json("stats", response).await.ok()?;
        let entry = stats.pointer("/Stats/0")?;
        Some(ResourceUsage {
            cpu_percent: entry.get("CPU").and_then(Value::as_f64).unwrap_or(0.0),
            memory_bytes: entry.get("MemUsage").and_then(Value::as_u64)?,
            memory_limit_bytes: entry.get("MemLimit").and_then(Value::as_u64).filter(|l| *l > 0),
        })
    }

    async fn list(&self, all: bool) -> Result<Vec<WorkloadSnapshot>> {
        let request = self
            .client
            .get(self.url("containers/json"))
            .query(&[("all", all.to_string())]);
        let response = self.send("list", request).await?;
        let entries = Self::json("list", response).await?;
        let entries = entries
            .as_array()
            .ok_or_else(|| EngineError::translation(KIND.as_str(), "container list is not an array"))?;
        Ok(entries
            .iter()
            .map(|entry| normalize::workload_snapshot(KIND.as_str(), entry))
            .collect())
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let request = self.client.get(self.url(&format!("containers/{}/logs", id))).query(&[
            ("stdout", "true".to_string()),
            ("stderr", "true".to_string()),
            ("timestamps", "true".to_string()),
            ("tail", tail.to_string()),
        ]);
        let response = self.send_for_workload("logs", id, request).await?;
        let raw = response
            .bytes()
            .await
            .map_err(|e| EngineError::backend(KIND.as_str(), "logs", e))?;
        Ok(normalize::demux_stream(&raw))
    }

    async fn run_exec(&self, id: &str, command: &str) -> Result<ExecResult> {
        let argv = split_command(KIND.as_str(), command)?;

        let create = self
            .client
            .post(self.url(&format!("containers/{}/exec", id)))
            .json(&json!({
                "AttachStdout": true,
                "AttachStderr": true,
                "Cmd": argv,
            }));
        let created = Self::json("exec", self.send_for_workload("exec", id, create).await?).await?;
        let exec_id = created
            .get("Id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::translation(KIND.as_str(), "exec create returned no Id"))?
            .to_string();

        let start = self
            .client
            .post(self.url(&format!("exec/{}/start", exec_id)))
            .json(&json!({ "Detach": false, "Tty": false }));
        let raw = self
            .send("exec", start)
            .await?
            .bytes()
            .await
            .map_err(|e| EngineError::backend(KIND.as_str(), "exec", e))?;
        let output = normalize::demux_stream(&raw);

        let inspect = self.client.get(self.url(&format!("exec/{}/json", exec_id)));
        let details = Self::json("exec", self.send("exec", inspect).await?).await?;

        Ok(ExecResult {
            exit_code: details.get("ExitCode").and_then(Value::as_i64).unwrap_or(-1),
            output,
        })
    }

    async fn pull(&self, image: &str, tag: &str) -> Result<bool> {
        let reference = format!("{}:{}", image, tag);
        let request = self
            .client
            .post(self.url("images/pull"))
            .query(&[("reference", reference.as_str())]);
        let body = self
            .send("pull", request)
            .await?
            .text()
            .await
            .map_err(|e| EngineError::backend(KIND.as_str(), "pull", e))?;
        if let Some(error) = stream_error(&body) {
            return Err(EngineError::backend(KIND.as_str(), "pull", error));
        }
        info!(image = %reference, "Podman image pulled");
        Ok(true)
    }

    async fn images(&self) -> Result<Vec<ImageSnapshot>> {
        let response = self.send("images", self.client.get(self.url("images/json"))).await?;
        let entries = Self::json("images", response).await?;
        Ok(entries
            .as_array()
            .map(|list| list.iter().map(normalize::image_snapshot).collect())
            .unwrap_or_default())
    }

    async fn rmi(&self, id: &str, force: bool) -> Result<bool> {
        let request = self
            .client
            .delete(self.url(&format!("images/{}", id)))
            .query(&[("force", force.to_string())]);
        self.send("rmi", request).await?;
        info!(image = %id, "Podman image removed");
        Ok(true)
    }

    async fn networks(&self) -> Result<Vec<NetworkSnapshot>> {
        let response = self.send("networks", self.client.get(self.url("networks/json"))).await?;
        let entries = Self::json("networks", response).await?;
        Ok(entries
            .as_array()
            .map(|list| list.iter().map(normalize::network_snapshot).collect())
            .unwrap_or_default())
    }

    async fn network_rm(&self, id: &str) -> Result<bool> {
        self.send("network-rm", self.client.delete(self.url(&format!("networks/{}", id))))
            .await?;
        info!(network = %id, "Podman network removed");
        Ok(true)
    }

    async fn network_membership(&self, operation: &str, workload: &str, network: &str) -> Result<bool> {
        let action = if operation == "network-connect" { "connect" } else { "disconnect" };
        let request = self
            .client
            .post(self.url(&format!("networks/{}/{}", network, action)))
            .json(&json!({ "container": workload }));
        self.send(operation, request).await?;
        info!(workload = %workload, network = %network, action, "Podman network membership changed");
        Ok(true)
    }
}

#[async_trait]
impl ContainerEngine for PodmanEngine {
    fn kind(&self) -> EngineKind {
        KIND
    }

    #[instrument(skip(self), fields(api_base = %self.api_base))]
    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("_ping"))
            .timeout(self.ping_timeout)
            .send()
            .await
            .map_err(|e| EngineError::connectivity(KIND.as_str(), e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::connectivity(
                KIND.as_str(),
                format!("ping returned HTTP {}", response.status().as_u16()),
            ))
        }
    }

    #[instrument(skip(self, spec), fields(workload = %spec.name, image = %spec.image))]
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<String> {
        info!("Creating Podman container");

        let body = spec_generator(spec)?;
        let response = self
            .send("create", self.client.post(self.url("containers/create")).json(&body))
            .await?;
        let created = Self::json("create", response).await?;

        if let Some(warnings) = created.get("Warnings").and_then(Value::as_array) {
            for warning in warnings.iter().filter_map(Value::as_str) {
                warn!(warning = %warning, "Podman create warning");
            }
        }

        let id = created
            .get("Id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::translation(KIND.as_str(), "create returned no Id"))?
            .to_string();
        info!(workload_id = %id, "Podman container created");
        Ok(id)
    }

    async fn start_workload(&self, id: &str) -> bool {
        caught(KIND, "start", id, self.lifecycle("start", id, None).await)
    }

    async fn stop_workload(&self, id: &str, timeout: Duration) -> bool {
        caught(KIND, "stop", id, self.lifecycle("stop", id, Some(timeout)).await)
    }

    async fn restart_workload(&self, id: &str, timeout: Duration) -> bool {
        caught(KIND, "restart", id, self.lifecycle("restart", id, Some(timeout)).await)
    }

    async fn remove_workload(&self, id: &str, force: bool) -> bool {
        caught(KIND, "remove", id, self.remove(id, force).await)
    }

    #[instrument(skip(self))]
    async fn inspect_workload(&self, id: &str) -> Result<WorkloadSnapshot> {
        let request = self.client.get(self.url(&format!("containers/{}/json", id)));
        let response = self.send_for_workload("inspect", id, request).await?;
        let mut snapshot = match response.json::<Value>().await {
            Ok(value) => normalize::workload_snapshot(KIND.as_str(), &value),
            Err(e) => WorkloadSnapshot::degraded(
                id,
                "",
                WorkloadStatus::Unknown,
                format!("unparseable inspect response: {}", e),
            ),
        };
        if snapshot.status == WorkloadStatus::Running {
            snapshot.usage = self.sample_usage(id).await;
        }
        Ok(snapshot)
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
        info!(context_bytes = context.len(), "Building Podman image");

        let build_args = serde_json::to_string(&request.build_args)
            .map_err(|e| EngineError::translation(KIND.as_str(), e))?;
        let http = self
            .client
            .post(self.url("build"))
            .query(&[
                ("t", request.tag.as_str()),
                ("dockerfile", request.dockerfile.as_str()),
                ("buildargs", build_args.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(context);
        let body = self
            .send("build", http)
            .await?
            .text()
            .await
            .map_err(|e| EngineError::backend(KIND.as_str(), "build", e))?;

        if let Some(error) = stream_error(&body) {
            return Err(EngineError::backend(KIND.as_str(), "build", error));
        }
        debug!(output_bytes = body.len(), "Build finished");
        info!("Podman image built");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn commit_workload(&self, id: &str, repository: &str, tag: &str) -> Result<String> {
        let request = self
            .client
            .post(self.url("commit"))
            .query(&[("container", id), ("repo", repository), ("tag", tag)]);
        let response = self.send_for_workload("commit", id, request).await?;
        let committed = Self::json("commit", response).await?;
        let image_id = committed
            .get("Id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", repository, tag));
        info!(image = %format!("{}:{}", repository, tag), image_id = %image_id, "Podman container committed");
        Ok(image_id)
    }

    #[instrument(skip(self, spec), fields(network = %spec.name))]
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let mut body = json!({ "name": spec.name, "driver": spec.driver });
        if let Some(subnet) = &spec.subnet {
            body["subnets"] = json!([{ "subnet": subnet }]);
        }
        let response = self
            .send("network-create", self.client.post(self.url("networks/create")).json(&body))
            .await?;
        let created = Self::json("network-create", response).await?;
        let id = normalize::str_field(&created, &["id", "Id"]).unwrap_or_else(|| spec.name.clone());
        info!(network_id = %id, "Podman network created");
        Ok(id)
    }

    async fn list_networks(&self) -> Vec<NetworkSnapshot> {
        caught(KIND, "networks", "-", self.networks().await)
    }

    async fn remove_network(&self, id: &str) -> bool {
        caught(KIND, "network-rm", id, self.network_rm(id).await)
    }

    async fn connect_network(&self, workload: &str, network: &str) -> bool {
        let result = self.network_membership("network-connect", workload, network).await;
        caught(KIND, "network-connect", workload, result)
    }

    async fn disconnect_network(&self, workload: &str, network: &str) -> bool {
        let result = self.network_membership("network-disconnect", workload, network).await;
        caught(KIND, "network-disconnect", workload, result)
    }

    async fn system_info(&self) -> Result<Value> {
        let response = self.send("info", self.client.get(self.url("info"))).await?;
        Self::json("info", response).await
    }

    async fn version(&self) -> Result<Value> {
        let response = self.send("version", self.client.get(self.url("version"))).await?;
        Self::json("version", response).await
    }
}

/// Translate a workload spec into a libpod `SpecGenerator` body.
pub(crate) fn spec_generator(spec: &WorkloadSpec) -> Result<Value> {
    let ports = spec
        .port_mappings()
        .map_err(|e| EngineError::translation(KIND.as_str(), e))?;

    let mut body = json!({
        "name": spec.name,
        "image": spec.image,
        "env": spec.environment,
        "privileged": spec.privileged,
        "restart_policy": spec.restart_policy.as_str(),
        "portmappings": ports.iter().map(|p| json!({
            "container_port": p.container_port,
            "host_port": p.host_port.unwrap_or(0),
            "protocol": p.protocol,
            "host_ip": p.host_ip.clone().unwrap_or_default(),
        })).collect::<Vec<_>>(),
        "mounts": spec.volumes.iter().map(|(source, destination)| json!({
            "type": "bind",
            "source": source,
            "destination": destination,
            "options": ["rbind"],
        })).collect::<Vec<_>>(),
        "devices": spec.devices.iter().map(|path| json!({ "path": path })).collect::<Vec<_>>(),
    });

    if let Some(command) = &spec.command {
        body["command"] = json!(split_command(KIND.as_str(), command)?);
    }
    if let Some(dir) = &spec.working_dir {
        body["work_dir"] = json!(dir);
    }
    if let Some(user) = &spec.user {
        body["user"] = json!(user);
    }
    if let Some(network) = &spec.network {
        body["netns"] = json!({ "nsmode": "bridge" });
        let mut networks = serde_json::Map::new();
        networks.insert(network.clone(), json!({}));
        body["networks"] = Value::Object(networks);
    }

    let mut limits = serde_json::Map::new();
    if let Some(cores) = spec.cpu_limit {
        let (quota, period) = cpu_quota(KIND.as_str(), cores)?;
        limits.insert("cpu".to_string(), json!({ "quota": quota, "period": period }));
    }
    if let Some(memory) = &spec.memory_limit {
        let bytes = parse_memory_limit(memory).map_err(|e| EngineError::translation(KIND.as_str(), e))?;
        limits.insert("memory".to_string(), json!({ "limit": bytes }));
    }
    if !limits.is_empty() {
        body["resource_limits"] = Value::Object(limits);
    }

    Ok(body)
}

/// Message from a libpod error body (`{"message": ...}`), or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| normalize::str_field(&v, &["message", "cause"]))
        .unwrap_or_else(|| body.trim().to_string())
}

/// First `error` in a newline-delimited JSON progress stream.
fn stream_error(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find_map(|event| {
            event
                .get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn engine(url: &str) -> PodmanEngine {
        PodmanEngine::connect(&EngineTarget::remote(url), &EngineOptions::default()).unwrap()
    }

    #[test]
    fn test_api_base() {
        let options = EngineOptions::default();
        let local = PodmanEngine::connect(&EngineTarget::local(), &options).unwrap();
        assert_eq!(local.api_base(), "http://localhost:8080/v1.0.0/libpod");

        let bare = PodmanEngine::connect(&EngineTarget::remote("10.0.0.7").with_port(8888), &options).unwrap();
        assert_eq!(bare.api_base(), "http://10.0.0.7:8888/v1.0.0/libpod");

        assert!(PodmanEngine::connect(&EngineTarget::remote("unix:///run/podman/podman.sock"), &options).is_err());
    }

    #[test]
    fn test_spec_generator() {
        let spec = WorkloadSpec::new("api", "python:3.12")
            .with_port("8080/tcp", "127.0.0.1:80")
            .with_memory_limit("2GB")
            .with_cpu_limit(0.5)
            .with_env("DEBUG", "1")
            .with_network("backend");
        let body = spec_generator(&spec).unwrap();

        assert_eq!(body["portmappings"][0]["container_port"], 8080);
        assert_eq!(body["portmappings"][0]["host_port"], 80);
        assert_eq!(body["portmappings"][0]["host_ip"], "127.0.0.1");
        assert_eq!(body["resource_limits"]["memory"]["limit"], 2_147_483_648u64);
        assert_eq!(body["resource_limits"]["cpu"]["quota"], 50_000);
        assert_eq!(body["resource_limits"]["cpu"]["period"], 100_000);
        assert_eq!(body["env"]["DEBUG"], "1");
        assert!(body["networks"].get("backend").is_some());
        assert_eq!(body["restart_policy"], "no");
    }

    #[test]
    fn test_spec_generator_quoting_and_cpu_validation() {
        let spec = WorkloadSpec::new("job", "alpine").with_command("sh -c 'sleep 5 && echo done'");
        let body = spec_generator(&spec).unwrap();
        assert_eq!(body["command"], json!(["sh", "-c", "sleep 5 && echo done"]));

        let unbalanced = WorkloadSpec::new("job", "alpine").with_command("sh -c 'sleep 5");
        assert!(matches!(spec_generator(&unbalanced), Err(EngineError::Translation { .. })));

        for cores in [-2.0, 0.0, f64::NAN] {
            let spec = WorkloadSpec::new("job", "alpine").with_cpu_limit(cores);
            assert!(matches!(spec_generator(&spec), Err(EngineError::Translation { .. })));
        }
    }

    #[tokio::test]
    async fn test_exec_with_unbalanced_quotes_sends_nothing() {
        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", "/v1.0.0/libpod/containers/web/exec")
            .expect(0)
            .create_async()
            .await;

        let result = engine(&server.url()).exec("web", "echo 'oops").await;
        assert_eq!(result.exit_code, -1);
        assert!(result.output.contains("cannot parse command"));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", "/v1.0.0/libpod/_ping")
            .with_status(200)
            .with_body("OK")
            .create_async()
            .await;

        assert!(engine(&server.url()).ping().await.is_ok());
        ok.assert_async().await;

        let mut down = Server::new_async().await;
        down.mock("GET", "/v1.0.0/libpod/_ping")
            .with_status(500)
            .create_async()
            .await;
        assert!(engine(&down.url()).ping().await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn test_inspect_unknown_workload_is_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1.0.0/libpod/containers/ghost/json")
            .with_status(404)
            .with_body(r#"{"cause":"no such container","message":"no container with name or ID \"ghost\" found","response":404}"#)
            .create_async()
            .await;

        let err = engine(&server.url()).inspect_workload("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::WorkloadNotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_sends_expanded_ports_and_byte_limits() {
        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", "/v1.0.0/libpod/containers/create")
            .match_body(Matcher::PartialJson(json!({
                "name": "web",
                "portmappings": [{"container_port": 8080, "host_port": 80, "protocol": "tcp"}],
                "resource_limits": {"memory": {"limit": 536870912u64}}
            })))
            .with_status(201)
            .with_body(r#"{"Id":"3f1c0e","Warnings":[]}"#)
            .create_async()
            .await;

        let spec = WorkloadSpec::new("web", "nginx").with_port("8080/tcp", "80").with_memory_limit("512MB");
        let id = engine(&server.url()).create_workload(&spec).await.unwrap();
        assert_eq!(id, "3f1c0e");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_failure_is_an_error_but_start_failure_is_false() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1.0.0/libpod/containers/create")
            .with_status(500)
            .with_body(r#"{"message":"image not known"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v1.0.0/libpod/containers/web/start")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("POST", "/v1.0.0/libpod/containers/web/stop")
            .match_query(Matcher::UrlEncoded("t".into(), "7".into()))
            .with_status(204)
            .create_async()
            .await;

        let podman = engine(&server.url());
        let err = podman.create_workload(&WorkloadSpec::new("web", "nope")).await.unwrap_err();
        assert!(err.to_string().contains("image not known"));
        assert!(!podman.start_workload("web").await);
        assert!(podman.stop_workload("web", Duration::from_secs(7)).await);
    }

    #[tokio::test]
    async fn test_exec_demuxes_output_and_reads_exit_code() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1.0.0/libpod/containers/web/exec")
            .match_body(Matcher::PartialJson(json!({ "Cmd": ["sh", "-c", "echo hi; exit 3"] })))
            .with_status(201)
            .with_body(r#"{"Id":"exec1"}"#)
            .create_async()
            .await;
        let mut framed = vec![1u8, 0, 0, 0, 0, 0, 0, 3];
        framed.extend_from_slice(b"hi\n");
        server
            .mock("POST", "/v1.0.0/libpod/exec/exec1/start")
            .with_status(200)
            .with_body(framed)
            .create_async()
            .await;
        server
            .mock("GET", "/v1.0.0/libpod/exec/exec1/json")
            .with_status(200)
            .with_body(r#"{"ExitCode":3,"Running":false}"#)
            .create_async()
            .await;

        let result = engine(&server.url()).exec("web", "sh -c 'echo hi; exit 3'").await;
        assert_eq!(result, ExecResult { exit_code: 3, output: "hi\n".to_string() });
    }

    #[tokio::test]
    async fn test_exec_on_unreachable_service_reports_minus_one() {
        let podman = engine("http://127.0.0.1:9");
        let result = podman.exec("web", "true").await;
        assert_eq!(result.exit_code, -1);
        assert!(!result.output.is_empty());
    }

    #[tokio::test]
    async fn test_list_normalizes_entries() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1.0.0/libpod/containers/json")
            .match_query(Matcher::UrlEncoded("all".into(), "true".into()))
            .with_status(200)
            .with_body(
                json!([
                    {"Id": "a1", "Names": ["api"], "State": "running", "Image": "python:3.12",
                     "Ports": [{"host_ip": "", "container_port": 5000, "host_port": 5000, "protocol": "tcp"}]},
                    {"Id": "b2", "Names": ["db"], "State": "exited", "Image": "postgres:16",
                     "Ports": [{"container_port": "five"}]}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let list = engine(&server.url()).list_workloads(true).await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].status, WorkloadStatus::Running);
        assert_eq!(list[0].port(5000, "tcp").unwrap().host_port, Some(5000));
        assert!(list[1].is_degraded());
        assert_eq!(list[1].name, "db");
        assert_eq!(list[1].status, WorkloadStatus::Exited);
    }

    #[tokio::test]
    async fn test_pull_reports_stream_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1.0.0/libpod/images/pull")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{\"stream\":\"Trying to pull...\"}\n{\"error\":\"manifest unknown\"}\n")
            .create_async()
            .await;

        assert!(!engine(&server.url()).pull_image("nginx", "nope").await);
    }
}
