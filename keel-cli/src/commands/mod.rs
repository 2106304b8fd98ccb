//! Commands module
//!
//! Defines all CLI commands and their handlers. Handlers return the process
//! exit code; setup errors are returned as `Err`.

mod init;
mod nodes;
mod pipeline;
mod run;

pub use init::InitCommands;
pub use run::RunArgs;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline
    Run(RunArgs),
    /// Check a pipeline definition without running it
    Validate {
        /// Path to the pipeline file
        pipeline: PathBuf,
    },
    /// Print the node blocks and stages of a pipeline
    Show {
        /// Path to the pipeline file
        pipeline: PathBuf,

        /// Print the pipeline structure as JSON
        #[arg(long)]
        json: bool,
    },
    /// List configured nodes and the tools found on this machine
    Nodes,
    /// Initialize development environment
    Init {
        #[command(subcommand)]
        command: InitCommands,
    },
}

/// Handle a CLI command
pub async fn handle_command(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Run(args) => run::handle_run_command(args, config).await,
        Commands::Validate { pipeline } => pipeline::validate_pipeline(&pipeline),
        Commands::Show { pipeline, json } => pipeline::show_pipeline(&pipeline, json),
        Commands::Nodes => nodes::list_nodes(config),
        Commands::Init { command } => init::handle_init_command(command),
    }
}
