//! Pipeline domain types

use serde::{Deserialize, Serialize};

/// Pipeline metadata extracted from a Lua definition
///
/// This structure contains the parsed shape of a pipeline: its node blocks
/// and their stage trees, but not the executable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub name: String,
    pub description: Option<String>,
    /// Tools that must be on PATH for host-backed nodes
    pub requires: Vec<String>,
    pub nodes: Vec<NodeBlockMetadata>,
}

impl PipelineMetadata {
    /// Filesystem-safe version of the pipeline name
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Number of leaf stages (stages that run an action) across all blocks
    pub fn stage_count(&self) -> usize {
        self.nodes.iter().map(NodeBlockMetadata::stage_count).sum()
    }
}

/// A stage sequence bound to a node label and optional workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeBlockMetadata {
    pub label: String,
    pub workspace: Option<String>,
    pub stages: Vec<StageMetadata>,
}

impl NodeBlockMetadata {
    pub fn stage_count(&self) -> usize {
        self.stages.iter().map(StageMetadata::leaf_count).sum()
    }

    /// Slash-joined paths of every leaf stage, in execution order
    pub fn stage_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for stage in &self.stages {
            stage.collect_paths("", &mut paths);
        }
        paths
    }
}

/// Stage metadata (name, directory and action kind)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetadata {
    pub name: String,
    pub dir: Option<String>,
    pub action: StageActionKind,
}

impl StageMetadata {
    fn leaf_count(&self) -> usize {
        match &self.action {
            StageActionKind::Nested { stages } => stages.iter().map(Self::leaf_count).sum(),
            _ => 1,
        }
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        let path = join_stage_path(prefix, &self.name);
        match &self.action {
            StageActionKind::Nested { stages } => {
                for stage in stages {
                    stage.collect_paths(&path, out);
                }
            }
            _ => out.push(path),
        }
    }
}

/// What a stage does when it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageActionKind {
    /// A shell command run with `sh -c`
    Shell { command: String },
    /// A Lua function
    Script,
    /// A nested stage sequence
    Nested { stages: Vec<StageMetadata> },
}

/// Joins a stage name onto a parent path (`Test` + `syntax` = `Test/syntax`)
pub fn join_stage_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "pipeline".to_string()
    } else {
        slug
    }
}
