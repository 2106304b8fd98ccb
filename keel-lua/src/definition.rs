//! Pipeline definition for runtime execution
//!
//! Unlike `PipelineMetadata` (which is serializable), `PipelineDefinition`
//! holds live Lua function references for `script` stages and is only valid
//! inside the Lua state it was parsed from.

use anyhow::{Context, Result};
use keel_core::domain::pipeline::{
    NodeBlockMetadata, PipelineMetadata, StageActionKind, StageMetadata,
};
use mlua::{Function, Lua, Table, Value};

/// Full pipeline definition with executable Lua functions
pub struct PipelineDefinition {
    pub name: String,
    pub description: Option<String>,
    pub requires: Vec<String>,
    pub nodes: Vec<NodeBlockDefinition>,
}

/// A stage sequence bound to a node label
pub struct NodeBlockDefinition {
    pub label: String,
    pub workspace: Option<String>,
    pub stages: Vec<StageDefinition>,
}

/// Stage definition with its action
pub struct StageDefinition {
    pub name: String,
    /// Working directory relative to the parent stage (or the workspace)
    pub dir: Option<String>,
    pub action: StageAction,
}

/// What a stage runs
pub enum StageAction {
    Shell(String),
    Script(Function),
    Nested(Vec<StageDefinition>),
}

impl PipelineDefinition {
    /// Strips the executable parts, keeping the structure
    pub fn metadata(&self) -> PipelineMetadata {
        PipelineMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            requires: self.requires.clone(),
            nodes: self.nodes.iter().map(NodeBlockDefinition::metadata).collect(),
        }
    }
}

impl NodeBlockDefinition {
    pub fn metadata(&self) -> NodeBlockMetadata {
        NodeBlockMetadata {
            label: self.label.clone(),
            workspace: self.workspace.clone(),
            stages: self.stages.iter().map(StageDefinition::metadata).collect(),
        }
    }
}

impl StageDefinition {
    pub fn metadata(&self) -> StageMetadata {
        let action = match &self.action {
            StageAction::Shell(command) => StageActionKind::Shell {
                command: command.clone(),
            },
            StageAction::Script(_) => StageActionKind::Script,
            StageAction::Nested(stages) => StageActionKind::Nested {
                stages: stages.iter().map(StageDefinition::metadata).collect(),
            },
        };

        StageMetadata {
            name: self.name.clone(),
            dir: self.dir.clone(),
            action,
        }
    }
}

/// Parse a pipeline definition from Lua source code
///
/// The source is evaluated in `lua` and must return a table:
///
/// ```lua
/// return {
///     name = "dcos-cli",
///     requires = { "make" },
///     nodes = {
///         { label = "py35", stages = {
///             { name = "Build binary", sh = "make binary" },
///         } },
///     },
/// }
/// ```
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or does not return a table
/// - `name` or `nodes` is missing, or `nodes` is empty
/// - A node block has no `label` or no stages
/// - A stage has no `name`, or not exactly one of `sh`, `script`, `stages`
pub fn parse_pipeline_definition(lua: &Lua, source: &str) -> Result<PipelineDefinition> {
    let pipeline: Table = lua
        .load(source)
        .set_name("pipeline")
        .eval()
        .context("Failed to evaluate pipeline definition")?;

    let name: Option<String> = pipeline
        .get("name")
        .context("Field 'name' must be a string")?;
    let name = name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Pipeline must have a 'name' field"))?;

    let description = pipeline
        .get::<Option<String>>("description")
        .ok()
        .flatten();

    let requires = parse_requires(&pipeline)?;
    let nodes = parse_nodes(&pipeline)?;

    Ok(PipelineDefinition {
        name,
        description,
        requires,
        nodes,
    })
}

fn parse_requires(pipeline: &Table) -> Result<Vec<String>> {
    let requires_value: Value = pipeline.get("requires").unwrap_or(Value::Nil);

    match requires_value {
        Value::Nil => Ok(Vec::new()),
        Value::Table(table) => {
            let mut requires = Vec::new();
            for entry in table.sequence_values::<String>() {
                requires.push(entry.context("Failed to read requires entry")?);
            }
            Ok(requires)
        }
        _ => Err(anyhow::anyhow!(
            "Field 'requires' must be an array of strings"
        )),
    }
}

fn parse_nodes(pipeline: &Table) -> Result<Vec<NodeBlockDefinition>> {
    let nodes_value: Value = pipeline.get("nodes").unwrap_or(Value::Nil);

    let nodes_table = match nodes_value {
        Value::Table(table) => table,
        Value::Nil => anyhow::bail!("Pipeline must have a 'nodes' field"),
        _ => anyhow::bail!("Field 'nodes' must be an array of node blocks"),
    };

    let mut nodes = Vec::new();
    for entry in nodes_table.sequence_values::<Table>() {
        let node_table = entry.context("Failed to read node block entry")?;
        nodes.push(parse_node_block(&node_table, nodes.len() + 1)?);
    }

    if nodes.is_empty() {
        anyhow::bail!("Pipeline must have at least one node block");
    }

    Ok(nodes)
}

fn parse_node_block(table: &Table, position: usize) -> Result<NodeBlockDefinition> {
    let label: Option<String> = table
        .get("label")
        .with_context(|| format!("Node block #{}: 'label' must be a string", position))?;
    let label = label
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Node block #{} must have a 'label' field", position))?;

    let workspace: Option<String> = table
        .get("workspace")
        .with_context(|| format!("Node block '{}': 'workspace' must be a string", label))?;

    let stages_table: Option<Table> = table
        .get("stages")
        .with_context(|| format!("Node block '{}': 'stages' must be a table", label))?;
    let stages_table = stages_table
        .ok_or_else(|| anyhow::anyhow!("Node block '{}' must have a 'stages' field", label))?;

    let stages = parse_stage_list(&stages_table)?;
    if stages.is_empty() {
        anyhow::bail!("Node block '{}' must have at least one stage", label);
    }

    Ok(NodeBlockDefinition {
        label,
        workspace,
        stages,
    })
}

fn parse_stage_list(table: &Table) -> Result<Vec<StageDefinition>> {
    let mut stages = Vec::new();
    for entry in table.sequence_values::<Table>() {
        let stage_table = entry.context("Failed to read stage entry")?;
        stages.push(parse_stage(&stage_table)?);
    }
    Ok(stages)
}

fn parse_stage(table: &Table) -> Result<StageDefinition> {
    let name: Option<String> = table
        .get("name")
        .context("Stage 'name' must be a string")?;
    let name = name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Stage must have a 'name' field"))?;

    let dir: Option<String> = table
        .get("dir")
        .with_context(|| format!("Stage '{}': 'dir' must be a string", name))?;

    let mut actions = Vec::new();

    match table.get::<Value>("sh")? {
        Value::Nil => {}
        Value::String(command) => actions.push(StageAction::Shell(command.to_str()?.to_string())),
        _ => anyhow::bail!("Stage '{}': 'sh' must be a command string", name),
    }

    match table.get::<Value>("script")? {
        Value::Nil => {}
        Value::Function(script) => actions.push(StageAction::Script(script)),
        _ => anyhow::bail!("Stage '{}': 'script' must be a function", name),
    }

    match table.get::<Value>("stages")? {
        Value::Nil => {}
        Value::Table(nested) => {
            let nested = parse_stage_list(&nested)?;
            if nested.is_empty() {
                anyhow::bail!("Stage '{}' has an empty 'stages' list", name);
            }
            actions.push(StageAction::Nested(nested));
        }
        _ => anyhow::bail!("Stage '{}': 'stages' must be a list of stages", name),
    }

    if actions.len() > 1 {
        anyhow::bail!(
            "Stage '{}' must define only one of 'sh', 'script' or 'stages'",
            name
        );
    }
    let action = actions.pop().ok_or_else(|| {
        anyhow::anyhow!(
            "Stage '{}' must define one of 'sh', 'script' or 'stages'",
            name
        )
    })?;

    Ok(StageDefinition { name, dir, action })
}
