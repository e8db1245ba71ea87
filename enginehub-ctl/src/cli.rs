//! Command-line argument parsing.

use clap::{Parser, Subcommand};

/// Default location of the engine configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/enginehub/engines.yaml";

/// enginehub - manage workloads across Docker, Podman and LXC engines
#[derive(Parser, Debug)]
#[command(name = "enginehub")]
#[command(about = "Manage workloads across Docker, Podman and LXC engines")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (defaults used if not found)
    #[arg(short, long, global = true, env = "ENGINEHUB_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "ENGINEHUB_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Enable development mode (in-memory engine instead of configured ones)
    #[arg(long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List registered engines with their connection state
    Engines,

    /// Probe every engine once
    Health,

    /// List workloads (all engines unless --engine is given)
    Ps {
        /// Include stopped workloads
        #[arg(short, long)]
        all: bool,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// List images
    Images {
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// List networks
    Networks {
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Show engine system info and version
    Info {
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Inspect a workload
    Inspect {
        id: String,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Find which engine owns a workload
    Find { id: String },

    /// Print the last lines of a workload's logs
    Logs {
        id: String,

        #[arg(short, long, default_value_t = 100)]
        tail: usize,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Run a command inside a workload
    Exec {
        id: String,

        #[arg(short, long)]
        engine: Option<String>,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Start a workload
    Start {
        id: String,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Stop a workload
    Stop {
        id: String,

        /// Seconds to wait before killing
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Restart a workload
    Restart {
        id: String,

        /// Seconds to wait before killing
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Remove a workload
    Rm {
        id: String,

        /// Remove even if running
        #[arg(short, long)]
        force: bool,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Create a workload from a YAML spec file
    Run {
        spec: String,

        /// Start the workload after creating it
        #[arg(long)]
        start: bool,

        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Register engines and run the health monitor until Ctrl-C
    Serve,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["enginehub", "ps", "--all", "--dev", "-e", "lxd"]).unwrap();
        assert!(args.dev);
        assert_eq!(args.config, DEFAULT_CONFIG_PATH);
        assert_eq!(
            args.command,
            Command::Ps { all: true, engine: Some("lxd".to_string()) }
        );
    }

    #[test]
    fn test_exec_takes_trailing_command() {
        let args = Args::try_parse_from(["enginehub", "exec", "web", "--", "ls", "-la", "/tmp"]).unwrap();
        match args.command {
            Command::Exec { id, command, engine } => {
                assert_eq!(id, "web");
                assert_eq!(command, vec!["ls", "-la", "/tmp"]);
                assert!(engine.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_stop_timeout_default() {
        let args = Args::try_parse_from(["enginehub", "stop", "web"]).unwrap();
        assert_eq!(
            args.command,
            Command::Stop { id: "web".to_string(), timeout: 10, engine: None }
        );
    }
}
