//! Pipeline runner
//!
//! Drives a whole run: parses the pipeline, then executes its node blocks
//! one after another in declaration order. Each block acquires a node, gets
//! a clean workspace and runs its stages on a blocking thread with its own
//! Lua VM.

use anyhow::{Context as AnyhowContext, Result};
use keel_core::domain::node::{Node, NodeBackend};
use keel_core::domain::pipeline::{NodeBlockMetadata, PipelineMetadata};
use keel_core::domain::run::{BlockResult, GENERIC_FAILURE_EXIT_CODE, RunResult};
use keel_lua::parse_pipeline_metadata;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{FailurePolicy, RunnerConfig};
use crate::context::{Context, ContextParts};
use crate::error::RunError;
use crate::executor::{ExecutorParams, build_executor};
use crate::lua::executor::LuaExecutor;
use crate::pool::NodePool;
use crate::service::{CapabilitiesService, InMemoryLogBuffer, StandardCapabilitiesService};
use crate::workspace::{clean_workspace, resolve_workspace};

/// Runs pipelines against a configured node pool
pub struct PipelineRunner {
    config: RunnerConfig,
    pool: Arc<NodePool>,
    capabilities: Arc<dyn CapabilitiesService>,
    only_labels: Vec<String>,
}

impl PipelineRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let pool = Arc::new(NodePool::new(config.nodes.clone(), config.acquire_timeout));
        Self {
            config,
            pool,
            capabilities: Arc::new(StandardCapabilitiesService::new()),
            only_labels: Vec::new(),
        }
    }

    /// Replaces the tool discovery used for preflight checks
    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilitiesService>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Restricts the run to blocks with one of `labels`; others are skipped
    pub fn with_only_labels(mut self, labels: Vec<String>) -> Self {
        self.only_labels = labels;
        self
    }

    /// Reads and runs a pipeline file
    pub async fn run_file(&self, path: &Path) -> Result<RunResult> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to open file [{}]", path.display()))?;
        self.run(&source).await
    }

    /// Runs a pipeline from source
    ///
    /// # Errors
    /// Only an invalid pipeline definition is an error; stage and block
    /// failures are reported in the returned `RunResult`.
    pub async fn run(&self, source: &str) -> Result<RunResult> {
        let metadata = parse_pipeline_metadata(source)?;
        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let source: Arc<str> = Arc::from(source);

        info!(
            "Starting run {} of pipeline '{}' ({} node block(s))",
            run_id,
            metadata.name,
            metadata.nodes.len()
        );

        let mut blocks = Vec::with_capacity(metadata.nodes.len());
        let mut halted = false;

        for (index, block) in metadata.nodes.iter().enumerate() {
            if halted {
                info!("Skipping block '{}' after an earlier failure", block.label);
                blocks.push(BlockResult::skipped(&block.label, block.stage_paths()));
                continue;
            }

            if !self.only_labels.is_empty() && !self.only_labels.contains(&block.label) {
                info!("Skipping block '{}' (not selected)", block.label);
                blocks.push(BlockResult::skipped(&block.label, block.stage_paths()));
                continue;
            }

            let result = self
                .run_block(run_id, &metadata, index, block, source.clone())
                .await;

            if result.is_failed() {
                error!(
                    "Block '{}' failed with exit code {}",
                    block.label, result.exit_code
                );
                halted = self.config.failure_policy == FailurePolicy::FailFast;
            } else {
                info!("Block '{}' succeeded", block.label);
            }

            blocks.push(result);
        }

        let result = RunResult::from_blocks(run_id, &metadata.name, blocks, started_at);
        info!(
            "Run {} finished: {} (exit code {})",
            run_id, result.status, result.exit_code
        );
        Ok(result)
    }

    async fn run_block(
        &self,
        run_id: Uuid,
        metadata: &PipelineMetadata,
        index: usize,
        block: &NodeBlockMetadata,
        source: Arc<str>,
    ) -> BlockResult {
        let aborted = |e: RunError| {
            error!("Block '{}': {}", block.label, e);
            BlockResult::aborted(&block.label, e.exit_code(), e.to_string(), block.stage_paths())
        };

        let lease = match self.pool.acquire(&block.label).await {
            Ok(lease) => lease,
            Err(e) => return aborted(e),
        };
        let node = lease.node().clone();

        if let Err(e) = self.preflight(&node, &metadata.requires) {
            let mut result = aborted(e);
            result.node = Some(node.name);
            return result;
        }

        let workspace = resolve_workspace(
            block.workspace.as_deref(),
            &self.config,
            &metadata.slug(),
            &block.label,
        );

        if let Err(e) = clean_workspace(&workspace, self.config.source_dir.as_deref()) {
            let mut result = aborted(e);
            result.node = Some(node.name);
            result.workspace = Some(workspace);
            return result;
        }

        let vars = self.block_vars(run_id, metadata, &node, &block.label, &workspace);
        let executor = build_executor(ExecutorParams {
            run_id,
            node: &node,
            workspace: &workspace,
            env: &vars,
            shell: &self.config.shell,
        });

        let context = Context::new(ContextParts {
            run_id,
            label: block.label.clone(),
            node: node.clone(),
            workspace: workspace.clone(),
            executor,
            log_buffer: Arc::new(InMemoryLogBuffer::new()),
            vars,
            source_dir: self.config.source_dir.clone(),
        });

        let task_context = context.clone();
        let joined = tokio::task::spawn_blocking(move || {
            task_context
                .executor()
                .prepare()
                .context("Failed to prepare executor")?;

            let outcomes = LuaExecutor::new(task_context.clone()).execute_block(&source, index);

            if let Err(e) = task_context.executor().cleanup() {
                warn!("Executor cleanup failed: {:#}", e);
            }
            outcomes
        })
        .await;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::anyhow!("Block task panicked: {}", e)),
        };

        match outcome {
            Ok(stages) => BlockResult::from_stages(
                &block.label,
                node.name,
                workspace,
                stages,
                context.drain_logs(),
            ),
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Block '{}': {}", block.label, message);
                context.log_error(message.clone());

                let mut result = BlockResult::aborted(
                    &block.label,
                    GENERIC_FAILURE_EXIT_CODE,
                    message,
                    block.stage_paths(),
                );
                result.node = Some(node.name);
                result.workspace = Some(workspace);
                result.logs = context.drain_logs();
                result
            }
        }
    }

    /// Checks required tools on host nodes
    ///
    /// Container nodes are not checked; their tools live in the image.
    fn preflight(&self, node: &Node, requires: &[String]) -> Result<(), RunError> {
        if requires.is_empty() || node.backend != NodeBackend::Host {
            return Ok(());
        }

        let missing = self.capabilities.missing(requires);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RunError::MissingTools {
                node: node.name.clone(),
                missing,
            })
        }
    }

    fn block_vars(
        &self,
        run_id: Uuid,
        metadata: &PipelineMetadata,
        node: &Node,
        label: &str,
        workspace: &Path,
    ) -> BTreeMap<String, String> {
        let mut vars = self.config.env.clone();
        vars.insert("WORKSPACE".to_string(), workspace.display().to_string());
        vars.insert("NODE_NAME".to_string(), node.name.clone());
        vars.insert("NODE_LABEL".to_string(), label.to_string());
        vars.insert("KEEL_RUN_ID".to_string(), run_id.to_string());
        vars.insert("KEEL_PIPELINE".to_string(), metadata.name.clone());
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::run::RunStatus;
    use std::fs;
    use std::time::Duration;

    struct FixedCapabilities(Vec<String>);

    impl CapabilitiesService for FixedCapabilities {
        fn discover(&self) -> Vec<String> {
            self.0.clone()
        }

        fn missing(&self, requires: &[String]) -> Vec<String> {
            requires
                .iter()
                .filter(|tool| !self.0.contains(tool))
                .cloned()
                .collect()
        }
    }

    fn config(root: &Path) -> RunnerConfig {
        RunnerConfig {
            workspace_root: root.to_path_buf(),
            ..RunnerConfig::default()
        }
    }

    const TWO_BLOCKS: &str = r#"
        local py35 = pipeline.builder("py35")
        local mesos = pipeline.builder("mesos")
        return pipeline.define {
            name = "Two Blocks",
            nodes = {
                py35 {
                    pipeline.stage("Build", "echo py35 > built.txt"),
                    pipeline.stage("Test", "exit 3"),
                    pipeline.stage("Package", "touch packaged"),
                },
                mesos {
                    pipeline.stage("Build", "touch mesos-built"),
                },
            },
        }
    "#;

    #[tokio::test]
    async fn test_successful_run() {
        let root = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new(config(root.path()));

        let source = r#"
            return pipeline.define {
                name = "Green",
                nodes = {
                    pipeline.builder("py35")({
                        pipeline.stage("Build", "echo ok"),
                        pipeline.stage("Check", function() log.info(env.get("NODE_NAME")) end),
                    }),
                },
            }
        "#;

        let result = runner.run(source).await.unwrap();
        assert!(result.success());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.pipeline, "Green");

        let block = &result.blocks[0];
        assert_eq!(block.node.as_deref(), Some("local"));
        assert_eq!(block.workspace, Some(root.path().join("green").join("py35")));
        assert!(block.logs.iter().any(|l| l.message == "local"));
    }

    #[tokio::test]
    async fn test_fail_fast_skips_later_blocks() {
        let root = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new(config(root.path()));

        let result = runner.run(TWO_BLOCKS).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code, 3);

        let py35 = &result.blocks[0];
        assert_eq!(py35.status, RunStatus::Failed);
        assert_eq!(py35.stages[0].status, RunStatus::Succeeded);
        assert_eq!(py35.stages[1].status, RunStatus::Failed);
        assert_eq!(py35.stages[2].status, RunStatus::Skipped);

        let mesos = &result.blocks[1];
        assert_eq!(mesos.status, RunStatus::Skipped);
        assert!(!root.path().join("two-blocks/mesos/mesos-built").exists());
    }

    #[tokio::test]
    async fn test_block_error_names_failed_stage_once() {
        let root = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new(config(root.path()));

        let result = runner.run(TWO_BLOCKS).await.unwrap();
        let error = result.blocks[0].error.clone().unwrap();

        assert_eq!(error, "Stage 'Test' failed: `exit 3` exited with code 3");
        assert_eq!(result.blocks[0].stages[1].error.as_deref(), Some("`exit 3` exited with code 3"));
    }

    #[tokio::test]
    async fn test_continue_policy_attempts_later_blocks() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.failure_policy = FailurePolicy::Continue;
        let runner = PipelineRunner::new(config);

        let result = runner.run(TWO_BLOCKS).await.unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.blocks[1].status, RunStatus::Succeeded);
        assert!(root.path().join("two-blocks/mesos/mesos-built").exists());
    }

    #[tokio::test]
    async fn test_workspace_is_cleaned_before_first_stage() {
        let root = tempfile::tempdir().unwrap();
        let ws = root.path().join("shared");
        fs::create_dir_all(&ws).unwrap();
        fs::write(ws.join("stale-marker"), "old").unwrap();

        let runner = PipelineRunner::new(config(root.path()));
        let source = r#"
            return {
                name = "Clean",
                nodes = { { label = "py35", workspace = "shared", stages = {
                    { name = "Check", sh = "test ! -e stale-marker" },
                } } },
            }
        "#;

        let result = runner.run(source).await.unwrap();
        assert!(result.success(), "{:?}", result.blocks[0].error);
        assert!(!ws.join("stale-marker").exists());
    }

    #[tokio::test]
    async fn test_workspace_env_default_is_used() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.workspace = Some(root.path().join("from-env"));
        let runner = PipelineRunner::new(config);

        let source = r#"
            return { name = "Env", nodes = { { label = "py35", stages = {
                { name = "Mark", sh = "touch mark" },
            } } } }
        "#;

        let result = runner.run(source).await.unwrap();
        assert!(result.success());
        assert!(root.path().join("from-env/mark").exists());
    }

    #[tokio::test]
    async fn test_workspace_cleanup_failure_aborts_block() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let runner = PipelineRunner::new(config(root.path()));
        let source = format!(
            r#"return {{ name = "Bad", nodes = {{ {{ label = "py35", workspace = "{}", stages = {{
                {{ name = "Never", sh = "true" }},
            }} }} }} }}"#,
            file.display()
        );

        let result = runner.run(&source).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.blocks[0].error.as_deref().unwrap_or("").contains("clean workspace"));
        assert_eq!(result.blocks[0].stages[0].status, RunStatus::Skipped);
    }

    #[tokio::test]
    async fn test_workspace_containing_sources_is_not_cleaned() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("repo");
        fs::create_dir_all(repo.join("src")).unwrap();
        fs::write(repo.join("src/main.py"), "print()").unwrap();

        let mut config = config(root.path());
        config.workspace = Some(repo.clone());
        config.source_dir = Some(repo.join("src"));
        let runner = PipelineRunner::new(config);

        let source = r#"
            return { name = "Checkout", nodes = { { label = "py35", stages = {
                { name = "Checkout", script = function() scm.checkout() end },
            } } } }
        "#;

        let result = runner.run(source).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.blocks[0].status, RunStatus::Failed);
        assert!(result.blocks[0].error.as_deref().unwrap_or("").contains("source directory"));
        assert_eq!(result.blocks[0].stages[0].status, RunStatus::Skipped);
        assert!(repo.join("src/main.py").exists());
    }

    #[tokio::test]
    async fn test_no_matching_node_fails_block() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.nodes = vec![Node::new("py", vec!["py35".to_string()])];
        let runner = PipelineRunner::new(config);

        let result = runner.run(TWO_BLOCKS.replace("exit 3", "true").as_str()).await.unwrap();

        assert_eq!(result.blocks[0].status, RunStatus::Succeeded);
        assert_eq!(result.blocks[1].status, RunStatus::Failed);
        assert!(result.blocks[1].error.as_deref().unwrap_or("").contains("mesos"));
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_missing_tools_fail_preflight() {
        let root = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new(config(root.path()))
            .with_capabilities(Arc::new(FixedCapabilities(vec!["make".to_string()])));

        let source = r#"
            return {
                name = "Tools",
                requires = { "make", "tox" },
                nodes = { { label = "py35", stages = { { name = "s", sh = "true" } } } },
            }
        "#;

        let result = runner.run(source).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.blocks[0].error.as_deref().unwrap_or("").contains("tox"));
        assert_eq!(result.blocks[0].node.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn test_only_labels_filter() {
        let root = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new(config(root.path()))
            .with_only_labels(vec!["mesos".to_string()]);

        let result = runner.run(TWO_BLOCKS).await.unwrap();

        assert!(result.success());
        assert_eq!(result.blocks[0].status, RunStatus::Skipped);
        assert_eq!(result.blocks[1].status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_invalid_pipeline_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new(config(root.path()));

        assert!(runner.run("return { name = 'Broken' }").await.is_err());
    }

    #[tokio::test]
    async fn test_blocks_run_in_declaration_order() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        let log = root.path().join("order.log");
        config.env.insert("ORDER_LOG".to_string(), log.display().to_string());
        config.acquire_timeout = Some(Duration::from_secs(5));
        let runner = PipelineRunner::new(config);

        let source = r#"
            return { name = "Order", nodes = {
                { label = "first", stages = { { name = "s", sh = "echo first >> \"$ORDER_LOG\"" } } },
                { label = "second", stages = { { name = "s", sh = "echo second >> \"$ORDER_LOG\"" } } },
            } }
        "#;

        let result = runner.run(source).await.unwrap();
        assert!(result.success());
        assert_eq!(fs::read_to_string(&log).unwrap(), "first\nsecond\n");
    }
}
