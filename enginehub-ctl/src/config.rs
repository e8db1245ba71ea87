//! Configuration management for the CLI.
//!
//! ```yaml
//! engines:
//!   - name: local-docker
//!     kind: docker
//!     default: true
//!   - name: lab-lxd
//!     kind: lxc
//!     host: 10.0.0.20
//!     options:
//!       lxc_mode: remote
//!       accept_invalid_certs: true
//! health:
//!   interval_secs: 30
//! logging:
//!   level: debug
//!   format: json
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use enginehub_common::LogFormat;
use enginehub_engine::{EngineKind, EngineOptions, EngineTarget};

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engines registered at startup
    pub engines: Vec<EngineConfig>,
    /// Background health monitor
    pub health: HealthConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.json_logs {
            self.logging.format = "json".to_string();
        }

        self
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for engine in &self.engines {
            if engine.name.trim().is_empty() {
                bail!("Engine entry without a name");
            }
            if !seen.insert(engine.name.as_str()) {
                bail!("Engine '{}' is configured twice", engine.name);
            }
        }
        if self.engines.iter().filter(|e| e.default).count() > 1 {
            bail!("More than one engine is marked as default");
        }
        if self.health.interval_secs == 0 {
            bail!("health.interval_secs must be positive");
        }
        self.logging.log_format()?;
        Ok(())
    }

    /// The engine marked `default: true`, if any.
    pub fn default_engine(&self) -> Option<&str> {
        self.engines.iter().find(|e| e.default).map(|e| e.name.as_str())
    }
}

/// One engine registration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Unique engine name
    pub name: String,
    /// Backend kind
    pub kind: EngineKind,
    /// Host, URL or socket path (local defaults when omitted)
    #[serde(default)]
    pub host: Option<String>,
    /// Port appended to `host`
    #[serde(default)]
    pub port: Option<u16>,
    /// Make this the default engine
    #[serde(default)]
    pub default: bool,
    /// Backend-specific options
    #[serde(default)]
    pub options: EngineOptions,
}

impl EngineConfig {
    pub fn target(&self) -> EngineTarget {
        EngineTarget {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between probe rounds
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// `plain` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn log_format(&self) -> Result<LogFormat> {
        self.format.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use enginehub_engine::LxcMode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.engines.is_empty());
        assert_eq!(config.health.interval(), Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.log_format().unwrap(), LogFormat::Plain);
    }

    #[test]
    fn test_parse_engines() {
        let config = Config::from_yaml(
            r#"
engines:
  - name: local-docker
    kind: docker
  - name: lab-lxd
    kind: lxd
    host: 10.0.0.20
    port: 8443
    default: true
    options:
      lxc_mode: remote
      wait_for_operations: true
health:
  interval_secs: 15
"#,
        )
        .unwrap();

        assert_eq!(config.engines.len(), 2);
        assert_eq!(config.engines[0].kind, EngineKind::Docker);
        assert!(config.engines[0].target().is_local());
        assert_eq!(config.engines[0].options, EngineOptions::default());

        let lxd = &config.engines[1];
        assert_eq!(lxd.kind, EngineKind::Lxc);
        assert_eq!(lxd.target().to_string(), "10.0.0.20:8443");
        assert_eq!(lxd.options.lxc_mode, LxcMode::Remote);
        assert!(lxd.options.wait_for_operations);
        assert_eq!(lxd.options.lxc_binary, "lxc");

        assert_eq!(config.default_engine(), Some("lab-lxd"));
        assert_eq!(config.health.interval_secs, 15);
    }

    #[test]
    fn test_rejects_invalid_documents() {
        let duplicate = "engines:\n  - {name: a, kind: docker}\n  - {name: a, kind: podman}\n";
        assert!(Config::from_yaml(duplicate).is_err());

        let two_defaults =
            "engines:\n  - {name: a, kind: docker, default: true}\n  - {name: b, kind: podman, default: true}\n";
        assert!(Config::from_yaml(two_defaults).is_err());

        assert!(Config::from_yaml("engines:\n  - {name: a, kind: kvm}\n").is_err());
        assert!(Config::from_yaml("logging:\n  format: xml\n").is_err());
        assert!(Config::from_yaml("health:\n  interval_secs: 0\n").is_err());
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engines:\n  - name: pod\n    kind: podman\n    host: 10.0.0.3").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engines[0].name, "pod");

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("engines.yaml");
        assert!(Config::load(&missing).is_err());
        assert!(Config::load_or_default(&missing).unwrap().engines.is_empty());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from(["enginehub", "--log-level", "debug", "--json-logs", "engines"]).unwrap();
        let config = Config::default().with_cli_overrides(&args);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.log_format().unwrap(), LogFormat::Json);
    }
}
