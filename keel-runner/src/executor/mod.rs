//! Command executors
//!
//! A node's backend decides how commands are launched. Stages only see the
//! `CommandExecutor` trait, so the same pipeline runs on the host or inside
//! a podman container.

mod host;
mod podman;

pub use host::HostExecutor;
pub use podman::{ContainerExecutor, check_podman_available};

use anyhow::Result;
use keel_core::domain::node::{Node, NodeBackend};
use keel_core::domain::run::GENERIC_FAILURE_EXIT_CODE;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use uuid::Uuid;

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches commands for one node block
pub trait CommandExecutor: Send + Sync {
    /// Readies the backend before the first stage
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Runs `program` with `args` in `dir` (relative to the workspace)
    ///
    /// Errors mean the command could not be launched at all; a command that
    /// ran and failed is reported through `CommandOutput::exit_code`.
    fn exec(&self, program: &str, args: &[String], dir: Option<&str>) -> Result<CommandOutput>;

    /// Runs a shell script through the node's shell (`sh -c`)
    fn shell(&self, script: &str, dir: Option<&str>) -> Result<CommandOutput>;

    /// Releases backend resources after the last stage
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Everything needed to build the executor of a node block
pub struct ExecutorParams<'a> {
    pub run_id: Uuid,
    pub node: &'a Node,
    pub workspace: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub shell: &'a str,
}

/// Builds the executor matching the node's backend
pub fn build_executor(params: ExecutorParams<'_>) -> Box<dyn CommandExecutor> {
    match &params.node.backend {
        NodeBackend::Host => Box::new(HostExecutor::new(
            params.workspace.to_path_buf(),
            params.env.clone(),
            params.shell,
        )),
        NodeBackend::Container { image } => Box::new(ContainerExecutor::new(
            params.run_id,
            image,
            params.workspace.to_path_buf(),
            params.env.clone(),
            params.shell,
        )),
    }
}

/// Joins a stage directory onto a base directory
///
/// Absolute directories replace the base.
pub fn join_dir(base: Option<&str>, dir: Option<&str>) -> Option<String> {
    match (base, dir) {
        (_, Some(dir)) if Path::new(dir).is_absolute() => Some(dir.to_string()),
        (Some(base), Some(dir)) => Some(
            PathBuf::from(base)
                .join(dir)
                .to_string_lossy()
                .into_owned(),
        ),
        (None, Some(dir)) => Some(dir.to_string()),
        (base, None) => base.map(str::to_string),
    }
}

/// Exit code of a finished process
///
/// Processes killed by a signal report `128 + signal`, like a shell does.
pub(crate) fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    GENERIC_FAILURE_EXIT_CODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_dir() {
        assert_eq!(join_dir(None, None), None);
        assert_eq!(join_dir(Some("cli"), None), Some("cli".to_string()));
        assert_eq!(join_dir(None, Some("cli")), Some("cli".to_string()));
        assert_eq!(
            join_dir(Some("cli"), Some("tests")),
            Some("cli/tests".to_string())
        );
        assert_eq!(
            join_dir(Some("cli"), Some("/opt/src")),
            Some("/opt/src".to_string())
        );
    }

    #[test]
    fn test_build_executor_for_host_node() {
        let workspace = tempfile::tempdir().unwrap();
        let node = Node::local();
        let env = BTreeMap::new();

        let executor = build_executor(ExecutorParams {
            run_id: Uuid::new_v4(),
            node: &node,
            workspace: workspace.path(),
            env: &env,
            shell: "sh",
        });

        let output = executor.shell("echo built", None).unwrap();
        assert_eq!(output.stdout.trim(), "built");
    }
}
