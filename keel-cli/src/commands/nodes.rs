//! Nodes command handler
//!
//! Lists the nodes a run would schedule onto and the tools found on this
//! machine.

use anyhow::Result;
use colored::*;
use keel_core::domain::node::{Node, NodeBackend};
use keel_runner::RunnerConfig;
use keel_runner::service::{CapabilitiesService, StandardCapabilitiesService, WELL_KNOWN_TOOLS};

use crate::config::Config;

/// Handle `keel nodes`
pub fn list_nodes(config: &Config) -> Result<i32> {
    let runner_config = RunnerConfig::load(config.config_path.as_deref())?;

    println!(
        "{}",
        format!("{} configured node(s):", runner_config.nodes.len()).bold()
    );
    println!();
    for node in &runner_config.nodes {
        print_node_summary(node);
    }

    let found = StandardCapabilitiesService::new().discover();
    println!("{}", "Tools on this machine:".bold());
    for tool in WELL_KNOWN_TOOLS {
        if found.iter().any(|t| t == *tool) {
            println!("    {} {}", "✓".green(), tool);
        } else {
            println!("    {} {}", "✗".red(), tool.dimmed());
        }
    }

    Ok(0)
}

/// Print a node summary
fn print_node_summary(node: &Node) {
    println!("  {} Node {}", "▸".cyan(), node.name.bold());
    println!("    Labels:       {}", node.labels.join(", ").cyan());
    println!("    Executors:    {}", node.executors);
    println!("    Backend:      {}", colorize_backend(&node.backend));
    println!();
}

fn colorize_backend(backend: &NodeBackend) -> ColoredString {
    let backend_str = backend.to_string();
    match backend {
        NodeBackend::Host => backend_str.green(),
        NodeBackend::Container { .. } => backend_str.yellow(),
    }
}
