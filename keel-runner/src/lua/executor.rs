//! Lua executor service
//!
//! Runs the stages of one node block:
//! - creates an execution sandbox with the runtime modules
//! - re-parses the pipeline so `script` stages are live functions
//! - walks the stage tree in order, stopping at the first failure

use anyhow::{Context as AnyhowContext, Result};
use keel_core::domain::pipeline::join_stage_path;
use keel_core::domain::run::{GENERIC_FAILURE_EXIT_CODE, StageOutcome};
use keel_lua::{StageAction, StageDefinition, create_execution_sandbox, parse_pipeline_definition};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::context::Context;
use crate::error::RunError;
use crate::executor::join_dir;
use crate::lua::modules::runtime_registry;

/// Lua executor for a node block
pub struct LuaExecutor {
    context: Arc<Context>,
}

impl LuaExecutor {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    /// Executes block number `block_index` of `source`
    ///
    /// Returns one outcome per leaf stage in declaration order. After the
    /// first failure the remaining stages are reported as skipped.
    ///
    /// # Errors
    /// Fails when the sandbox cannot be built or the pipeline no longer
    /// parses; stage failures are reported through the outcomes.
    pub fn execute_block(&self, source: &str, block_index: usize) -> Result<Vec<StageOutcome>> {
        let registry = runtime_registry(&self.context)?;
        for module in registry.modules() {
            let metadata = module.metadata();
            debug!(
                "Loading module '{}' v{}: {}",
                metadata.id, metadata.version, metadata.description
            );
        }
        let lua = create_execution_sandbox(&registry)?;

        let definition = parse_pipeline_definition(&lua, source)
            .context("Failed to parse pipeline definition")?;
        let block = definition.nodes.get(block_index).ok_or_else(|| {
            anyhow::anyhow!(
                "Pipeline '{}' has no node block #{}",
                definition.name,
                block_index + 1
            )
        })?;

        info!(
            "Executing {} stage(s) of block '{}' on node '{}'",
            block.metadata().stage_count(),
            block.label,
            self.context.node.name
        );

        let mut outcomes = Vec::new();
        let mut failed = false;
        self.run_stages(&block.stages, "", None, &mut failed, &mut outcomes);

        Ok(outcomes)
    }

    fn run_stages(
        &self,
        stages: &[StageDefinition],
        prefix: &str,
        parent_dir: Option<&str>,
        failed: &mut bool,
        outcomes: &mut Vec<StageOutcome>,
    ) {
        for stage in stages {
            let path = join_stage_path(prefix, &stage.name);
            let dir = join_dir(parent_dir, stage.dir.as_deref());

            if let StageAction::Nested(children) = &stage.action {
                self.run_stages(children, &path, dir.as_deref(), failed, outcomes);
                continue;
            }

            if *failed {
                debug!("Skipping stage '{}'", path);
                outcomes.push(StageOutcome::skipped(path));
                continue;
            }

            self.context.log_info(format!("[Stage] {}", path));
            let started = Instant::now();
            let result = self.run_action(&stage.action, &path, dir.as_deref());
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => outcomes.push(StageOutcome::succeeded(path, duration_ms)),
                Err(e) => {
                    error!("{}", e);
                    self.context.log_error(e.to_string());
                    *failed = true;
                    outcomes.push(StageOutcome::failed(
                        path,
                        e.exit_code(),
                        e.detail(),
                        duration_ms,
                    ));
                }
            }
        }
    }

    fn run_action(&self, action: &StageAction, path: &str, dir: Option<&str>) -> Result<(), RunError> {
        match action {
            StageAction::Shell(command) => self.context.sh(path, command, dir).map(|_| ()),
            StageAction::Script(script) => {
                self.context.set_current_dir(dir.map(str::to_string));
                self.context.take_failure();

                let result = script.call::<()>(());
                self.context.set_current_dir(None);

                result.map_err(|e| {
                    let exit_code = self
                        .context
                        .take_failure()
                        .unwrap_or(GENERIC_FAILURE_EXIT_CODE);
                    RunError::stage_failed(path, exit_code, e.to_string())
                })
            }
            // Nested stages are expanded by run_stages
            StageAction::Nested(_) => Ok(()),
        }
    }
}
