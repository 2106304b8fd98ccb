//! Run command handler
//!
//! Loads the runner configuration, applies command-line overrides, runs the
//! pipeline and prints a per-block summary.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use keel_core::domain::run::{BlockResult, RunResult, RunStatus};
use keel_runner::{FailurePolicy, PipelineRunner, RunnerConfig};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;

/// Arguments of `keel run`
#[derive(Args)]
pub struct RunArgs {
    /// Path to the pipeline file
    pub pipeline: PathBuf,

    /// Workspace for node blocks that do not name one
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Attempt every node block even after a failure
    #[arg(long)]
    pub keep_going: bool,

    /// Only run node blocks with this label (repeatable)
    #[arg(long = "only", value_name = "LABEL")]
    pub only: Vec<String>,

    /// Extra variable for commands and scripts (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Directory copied by `scm.checkout()` (defaults to the pipeline's directory)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Write the run result as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Handle `keel run`
pub async fn handle_run_command(args: RunArgs, config: &Config) -> Result<i32> {
    let runner_config = RunnerConfig::load(config.config_path.as_deref())?;
    let runner_config = apply_overrides(runner_config, &args)?;
    runner_config.validate()?;

    info!(
        "Loaded configuration: {} node(s), failure policy {:?}",
        runner_config.nodes.len(),
        runner_config.failure_policy
    );

    let runner = PipelineRunner::new(runner_config).with_only_labels(args.only.clone());
    let result = runner.run_file(&args.pipeline).await?;

    print_run_summary(&result);

    if let Some(report) = &args.report {
        write_report(report, &result)?;
        println!("  {} {}", "Report".green(), report.display().to_string().cyan());
    }

    Ok(result.exit_code)
}

fn apply_overrides(mut config: RunnerConfig, args: &RunArgs) -> Result<RunnerConfig> {
    if let Some(workspace) = &args.workspace {
        config.workspace = Some(workspace.clone());
    }

    if args.keep_going {
        config.failure_policy = FailurePolicy::Continue;
    }

    for (key, value) in &args.env {
        config.env.insert(key.clone(), value.clone());
    }

    config.source_dir = Some(match &args.source {
        Some(source) => source.clone(),
        None => pipeline_dir(&args.pipeline)?,
    });

    Ok(config)
}

/// Directory containing the pipeline file
fn pipeline_dir(pipeline: &Path) -> Result<PathBuf> {
    let parent = match pipeline.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::path::absolute(&parent)
        .with_context(|| format!("Failed to resolve directory of {}", pipeline.display()))
}

fn write_report(path: &Path, result: &RunResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize run result")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn print_run_summary(result: &RunResult) {
    println!();
    println!(
        "{} {} {}",
        "Pipeline".bold(),
        result.pipeline.bold(),
        format!("(run {})", result.run_id).dimmed()
    );

    for block in &result.blocks {
        print_block_summary(block);
    }

    println!();
    let duration = result.finished_at - result.started_at;
    if result.success() {
        println!(
            "{} in {:.1}s",
            "✓ Pipeline succeeded".green().bold(),
            duration.num_milliseconds() as f64 / 1000.0
        );
    } else {
        println!(
            "{} with exit code {}",
            "✗ Pipeline failed".red().bold(),
            result.exit_code.to_string().red()
        );
    }
}

fn print_block_summary(block: &BlockResult) {
    let node = block.node.as_deref().unwrap_or("-");
    println!(
        "  {} {} on {} {}",
        "▸".cyan(),
        block.label.bold(),
        node,
        colorize_status(block.status)
    );

    if let Some(error) = &block.error {
        println!("    {}", error.red());
    }

    for stage in &block.stages {
        let timing = match stage.status {
            RunStatus::Skipped => String::new(),
            _ => format!("{}ms", stage.duration_ms),
        };
        println!(
            "    {:<10} {} {}",
            colorize_status(stage.status),
            stage.path,
            timing.dimmed()
        );
    }
}

/// Colorize a run status for display
fn colorize_status(status: RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
        RunStatus::Skipped => status_str.dimmed(),
        RunStatus::Pending | RunStatus::Running => status_str.yellow(),
    }
}
