//! Keel CLI
//!
//! Runs Lua-defined pipelines on the local machine or in podman containers.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel pipeline runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Runner configuration file
    #[arg(long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel=info,keel_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        config_path: cli.config,
    };

    let exit_code = handle_command(cli.command, &config).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}
