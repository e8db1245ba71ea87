//! One-shot command handlers. Each returns the JSON document to print.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use enginehub_engine::{EngineManager, WorkloadSpec};

use crate::cli::Command;

/// Run a query or action against the manager.
pub async fn execute(manager: &EngineManager, command: &Command) -> Result<Value> {
    debug!(command = ?command, "Executing command");

    let output = match command {
        Command::Engines => serde_json::to_value(manager.list_engines().await)?,

        Command::Health => serde_json::to_value(manager.health_check_all().await)?,

        Command::Ps { all, engine: Some(engine) } => {
            serde_json::to_value(manager.list_workloads(*all, Some(engine.as_str())).await?)?
        }
        Command::Ps { all, engine: None } => {
            serde_json::to_value(manager.list_all_workloads(*all).await)?
        }

        Command::Images { engine: Some(engine) } => {
            serde_json::to_value(manager.list_images(Some(engine.as_str())).await?)?
        }
        Command::Images { engine: None } => serde_json::to_value(manager.list_all_images().await)?,

        Command::Networks { engine: Some(engine) } => {
            serde_json::to_value(manager.list_networks(Some(engine.as_str())).await?)?
        }
        Command::Networks { engine: None } => {
            serde_json::to_value(manager.list_all_networks().await)?
        }

        Command::Info { engine: Some(engine) } => json!({
            "system": manager.system_info(Some(engine.as_str())).await?,
            "version": manager.version(Some(engine.as_str())).await?,
        }),
        Command::Info { engine: None } => {
            let mut info = manager.all_system_info().await;
            let mut versions = manager.all_versions().await;
            let merged: serde_json::Map<String, Value> = info
                .drain()
                .map(|(name, system)| {
                    let version = versions.remove(&name).unwrap_or_else(|| json!({}));
                    (name, json!({ "system": system, "version": version }))
                })
                .collect();
            Value::Object(merged)
        }

        Command::Inspect { id, engine } => {
            serde_json::to_value(manager.inspect_workload(id, engine.as_deref()).await?)?
        }

        Command::Find { id } => match manager.find_workload_engine(id).await {
            Some(engine) => json!({ "id": id, "engine": engine }),
            None => bail!("Workload '{}' not found on any engine", id),
        },

        Command::Logs { id, tail, engine } => {
            Value::String(manager.workload_logs(id, *tail, engine.as_deref()).await?)
        }

        Command::Exec { id, engine, command } => {
            let line = shell_words::join(command);
            serde_json::to_value(manager.exec(id, &line, engine.as_deref()).await?)?
        }

        Command::Start { id, engine } => {
            let ok = manager.start_workload(id, engine.as_deref()).await?;
            action_result("start", id, ok)?
        }
        Command::Stop { id, timeout, engine } => {
            let ok = manager
                .stop_workload(id, Duration::from_secs(*timeout), engine.as_deref())
                .await?;
            action_result("stop", id, ok)?
        }
        Command::Restart { id, timeout, engine } => {
            let ok = manager
                .restart_workload(id, Duration::from_secs(*timeout), engine.as_deref())
                .await?;
            action_result("restart", id, ok)?
        }
        Command::Rm { id, force, engine } => {
            let ok = manager.remove_workload(id, *force, engine.as_deref()).await?;
            action_result("remove", id, ok)?
        }

        Command::Run { spec, start, engine } => {
            let spec = load_spec(spec)?;
            let id = manager.create_workload(&spec, engine.as_deref()).await?;
            info!(workload = %spec.name, workload_id = %id, "Workload created");
            let started = if *start {
                manager.start_workload(&id, engine.as_deref()).await?
            } else {
                false
            };
            json!({ "id": id, "name": spec.name, "started": started })
        }

        Command::Serve => bail!("serve is not a one-shot command"),
    };

    Ok(output)
}

fn action_result(action: &str, id: &str, ok: bool) -> Result<Value> {
    if !ok {
        bail!("Failed to {} workload '{}', see logs for details", action, id);
    }
    Ok(json!({ "id": id, "action": action, "ok": true }))
}

/// Read a [`WorkloadSpec`] from a YAML file.
pub fn load_spec<P: AsRef<Path>>(path: P) -> Result<WorkloadSpec> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workload spec: {}", path.display()))?;
    let spec: WorkloadSpec = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse workload spec: {}", path.display()))?;
    if spec.name.trim().is_empty() || spec.image.trim().is_empty() {
        bail!("Workload spec needs both 'name' and 'image'");
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::{build_manager, DEV_ENGINE};
    use enginehub_engine::RestartPolicy;
    use std::io::Write;

    fn spec_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_load_spec() {
        let file = spec_file(
            "name: web\nimage: nginx:1.25\nports:\n  80/tcp: \"8080\"\nmemory_limit: 256MB\nrestart_policy: unless-stopped\n",
        );
        let spec = load_spec(file.path()).unwrap();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.ports.get("80/tcp").map(String::as_str), Some("8080"));
        assert_eq!(spec.memory_limit.as_deref(), Some("256MB"));
        assert_eq!(spec.restart_policy, RestartPolicy::UnlessStopped);

        assert!(load_spec(spec_file("image: nginx\n").path()).is_err());
    }

    #[tokio::test]
    async fn test_run_exec_and_remove_in_dev_mode() {
        let manager = build_manager(&Config::default(), true).await.unwrap();
        let file = spec_file("name: web\nimage: nginx:1.25\n");

        let run = Command::Run {
            spec: file.path().display().to_string(),
            start: true,
            engine: None,
        };
        let created = execute(&manager, &run).await.unwrap();
        assert_eq!(created["started"], json!(true));
        let id = created["id"].as_str().unwrap().to_string();

        let find = execute(&manager, &Command::Find { id: id.clone() }).await.unwrap();
        assert_eq!(find["engine"], json!(DEV_ENGINE));

        let exec = Command::Exec {
            id: id.clone(),
            engine: None,
            command: vec!["echo".to_string(), "hi".to_string()],
        };
        let result = execute(&manager, &exec).await.unwrap();
        assert_eq!(result["exit_code"], json!(0));

        let exec = Command::Exec {
            id: id.clone(),
            engine: None,
            command: vec!["echo".to_string(), "two  words".to_string(), "it's".to_string()],
        };
        let result = execute(&manager, &exec).await.unwrap();
        assert_eq!(result["output"], json!("two  words it's\n"));

        let rm = Command::Rm { id: id.clone(), force: false, engine: None };
        assert!(execute(&manager, &rm).await.is_err());
        let rm = Command::Rm { id: id.clone(), force: true, engine: None };
        assert_eq!(execute(&manager, &rm).await.unwrap()["ok"], json!(true));

        assert!(execute(&manager, &Command::Find { id }).await.is_err());
    }

    #[tokio::test]
    async fn test_listing_commands() {
        let manager = build_manager(&Config::default(), true).await.unwrap();

        let engines = execute(&manager, &Command::Engines).await.unwrap();
        assert_eq!(engines[0]["name"], json!(DEV_ENGINE));
        assert_eq!(engines[0]["is_default"], json!(true));

        let ps = execute(&manager, &Command::Ps { all: true, engine: None }).await.unwrap();
        assert!(ps[DEV_ENGINE].as_array().unwrap().is_empty());

        let info = execute(&manager, &Command::Info { engine: None }).await.unwrap();
        assert!(info[DEV_ENGINE]["system"].is_object());

        let missing = Command::Images { engine: Some("nope".to_string()) };
        assert!(execute(&manager, &missing).await.is_err());
    }
}
