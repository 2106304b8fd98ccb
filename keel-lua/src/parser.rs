//! Pipeline metadata parser
//!
//! Extracts the structure of a pipeline (name, requires, node blocks, stage
//! tree) without executing any stage. Uses the metadata sandbox, so runtime
//! modules such as `process` are not available at definition time.

use anyhow::{Context, Result};
use keel_core::domain::pipeline::PipelineMetadata;

use crate::definition::parse_pipeline_definition;
use crate::sandbox::create_metadata_sandbox;

/// Parse pipeline metadata from Lua source code
///
/// # Example
/// ```no_run
/// use keel_lua::parser::parse_pipeline_metadata;
///
/// let source = r#"
///     local py35 = pipeline.builder("py35")
///     return {
///         name = "dcos-cli",
///         nodes = {
///             py35 {
///                 pipeline.stage("Build binary", "make binary"),
///                 pipeline.stage("Run binary", "dist/dcos"),
///             },
///         },
///     }
/// "#;
///
/// let metadata = parse_pipeline_metadata(source)?;
/// assert_eq!(metadata.name, "dcos-cli");
/// assert_eq!(metadata.nodes[0].stages.len(), 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_pipeline_metadata(source: &str) -> Result<PipelineMetadata> {
    let lua = create_metadata_sandbox().context("Failed to create metadata sandbox")?;
    let definition = parse_pipeline_definition(&lua, source)?;
    Ok(definition.metadata())
}
