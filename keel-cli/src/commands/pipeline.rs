//! Pipeline command handlers
//!
//! `validate` and `show` only parse the pipeline file; no stage runs.

use anyhow::{Context, Result};
use colored::*;
use keel_core::domain::pipeline::{PipelineMetadata, StageActionKind, StageMetadata};
use keel_lua::parse_pipeline_metadata;
use std::path::Path;

fn load_metadata(path: &Path) -> Result<PipelineMetadata> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_metadata(&source)
        .with_context(|| format!("Invalid pipeline definition in {}", path.display()))
}

/// Handle `keel validate`
///
/// Returns exit code 1 when the definition is invalid.
pub fn validate_pipeline(path: &Path) -> Result<i32> {
    match load_metadata(path) {
        Ok(metadata) => {
            println!("{}", "✓ Pipeline is valid".green().bold());
            println!("  Name:   {}", metadata.name.bold());
            println!(
                "  Blocks: {}",
                metadata
                    .nodes
                    .iter()
                    .map(|b| b.label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
                    .dimmed()
            );
            println!("  Stages: {}", metadata.stage_count().to_string().dimmed());
            Ok(0)
        }
        Err(e) => {
            println!("{} {:#}", "✗".red().bold(), e);
            Ok(1)
        }
    }
}

/// Handle `keel show`
pub fn show_pipeline(path: &Path, json: bool) -> Result<i32> {
    let metadata = load_metadata(path)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&metadata).context("Failed to serialize pipeline")?
        );
        return Ok(0);
    }

    println!("{}", metadata.name.bold());
    if let Some(description) = &metadata.description {
        println!("  {}", description.dimmed());
    }
    if !metadata.requires.is_empty() {
        println!("  Requires: {}", metadata.requires.join(", ").cyan());
    }

    for block in &metadata.nodes {
        println!();
        let workspace = block
            .workspace
            .as_deref()
            .map(|w| format!(" (workspace {})", w))
            .unwrap_or_default();
        println!("  {} node {}{}", "▸".cyan(), block.label.bold(), workspace.dimmed());
        for line in render_stages(&block.stages, 2) {
            println!("{}", line);
        }
    }

    Ok(0)
}

/// Renders a stage tree as indented lines
fn render_stages(stages: &[StageMetadata], depth: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let indent = "  ".repeat(depth);

    for stage in stages {
        let dir = stage
            .dir
            .as_deref()
            .map(|d| format!(" [dir {}]", d))
            .unwrap_or_default();

        match &stage.action {
            StageActionKind::Shell { command } => {
                lines.push(format!("{}- {}{}: sh `{}`", indent, stage.name, dir, command));
            }
            StageActionKind::Script => {
                lines.push(format!("{}- {}{}: script", indent, stage.name, dir));
            }
            StageActionKind::Nested { stages } => {
                lines.push(format!("{}- {}{}", indent, stage.name, dir));
                lines.extend(render_stages(stages, depth + 1));
            }
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
        return pipeline.define {
            name = "Tree",
            nodes = {
                pipeline.builder("py35")({
                    pipeline.stage("Build", "make binary"),
                    pipeline.stage("Test", {
                        pipeline.stage("syntax", "tox -e py35-syntax", { dir = "cli" }),
                        pipeline.stage("notify", function() end),
                    }),
                }),
            },
        }
    "#;

    #[test]
    fn test_render_stages() {
        let metadata = parse_pipeline_metadata(PIPELINE).unwrap();
        let lines = render_stages(&metadata.nodes[0].stages, 0);

        assert_eq!(
            lines,
            vec![
                "- Build: sh `make binary`",
                "- Test",
                "  - syntax [dir cli]: sh `tox -e py35-syntax`",
                "  - notify: script",
            ]
        );
    }

    #[test]
    fn test_validate_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.lua");
        let bad = dir.path().join("bad.lua");
        std::fs::write(&good, PIPELINE).unwrap();
        std::fs::write(&bad, "return { name = 'no nodes' }").unwrap();

        assert_eq!(validate_pipeline(&good).unwrap(), 0);
        assert_eq!(validate_pipeline(&bad).unwrap(), 1);
        assert_eq!(validate_pipeline(&dir.path().join("missing.lua")).unwrap(), 1);
    }

    #[test]
    fn test_show_missing_file_is_an_error() {
        assert!(show_pipeline(Path::new("/nonexistent/pipeline.lua"), true).is_err());
    }
}
