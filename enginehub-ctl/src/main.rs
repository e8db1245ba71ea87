//! # enginehub
//!
//! Administrative CLI over the engine manager. Registers the engines listed
//! in the configuration file, then either runs a one-shot command and prints
//! its result as JSON, or (`serve`) keeps probing engine health until Ctrl-C.
//!
//! ## Usage
//! ```bash
//! enginehub --config /etc/enginehub/engines.yaml ps --all
//! enginehub exec web -- cat /etc/os-release
//! enginehub --dev run demos/web.yaml --start
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod commands;
mod config;
mod server;

use cli::{Args, Command};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    let config = Config::load_or_default(&args.config)?.with_cli_overrides(&args);

    // Initialize logging
    config.logging.log_format()?.init(&config.logging.level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %args.config,
        engines = config.engines.len(),
        "Starting enginehub"
    );

    let manager = server::build_manager(&config, args.dev).await?;

    if args.command == Command::Serve {
        if let Err(e) = server::run(&config, manager).await {
            error!(error = %e, "Serve failed");
            return Err(e);
        }
        return Ok(());
    }

    let output = commands::execute(&manager, &args.command).await?;
    match output {
        // logs print verbatim
        serde_json::Value::String(text) => print!("{}", text),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}
