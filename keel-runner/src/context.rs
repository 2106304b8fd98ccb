//! Execution context for node blocks
//!
//! Contains all state needed while a node block runs:
//! - the acquired node and resolved workspace
//! - the command executor for the node's backend
//! - the variables exposed to commands and the `env` module
//! - the block's log buffer
//! - the exit code of the last failed command

use keel_core::domain::log::{LogEntry, LogLevel};
use keel_core::domain::node::Node;
use keel_core::domain::run::GENERIC_FAILURE_EXIT_CODE;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::RunError;
use crate::executor::{CommandExecutor, CommandOutput};
use crate::service::LogBufferService;

/// Execution context of a single node block
pub struct Context {
    pub run_id: Uuid,
    pub label: String,
    pub node: Node,
    pub workspace: PathBuf,

    executor: Box<dyn CommandExecutor>,
    log_buffer: Arc<dyn LogBufferService>,
    vars: BTreeMap<String, String>,
    source_dir: Option<PathBuf>,

    /// Directory of the stage being executed, relative to the workspace
    current_dir: Mutex<Option<String>>,

    /// Exit code of the most recent failed command
    failure: Mutex<Option<i32>>,
}

/// Parts of a context that are not derived from the node
pub struct ContextParts {
    pub run_id: Uuid,
    pub label: String,
    pub node: Node,
    pub workspace: PathBuf,
    pub executor: Box<dyn CommandExecutor>,
    pub log_buffer: Arc<dyn LogBufferService>,
    pub vars: BTreeMap<String, String>,
    pub source_dir: Option<PathBuf>,
}

impl Context {
    pub fn new(parts: ContextParts) -> Arc<Self> {
        Arc::new(Self {
            run_id: parts.run_id,
            label: parts.label,
            node: parts.node,
            workspace: parts.workspace,
            executor: parts.executor,
            log_buffer: parts.log_buffer,
            vars: parts.vars,
            source_dir: parts.source_dir,
            current_dir: Mutex::new(None),
            failure: Mutex::new(None),
        })
    }

    pub fn executor(&self) -> &dyn CommandExecutor {
        self.executor.as_ref()
    }

    /// Variables of this block (`WORKSPACE`, `NODE_NAME`, ...)
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    pub fn current_dir(&self) -> Option<String> {
        self.current_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current_dir(&self, dir: Option<String>) {
        *self
            .current_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = dir;
    }

    /// Records the exit code of a failed command
    pub fn record_failure(&self, exit_code: i32) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit_code);
    }

    /// Takes the recorded exit code, leaving none behind
    pub fn take_failure(&self) -> Option<i32> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Runs a shell command for `stage`, failing on a non-zero exit
    ///
    /// Output is forwarded to the block log. The exit code of a failed
    /// command is recorded so script stages can report it.
    pub fn sh(&self, stage: &str, command: &str, dir: Option<&str>) -> Result<CommandOutput, RunError> {
        self.log_info(format!("+ {}", command));

        let output = match self.executor.shell(command, dir) {
            Ok(output) => output,
            Err(e) => {
                self.record_failure(GENERIC_FAILURE_EXIT_CODE);
                return Err(RunError::stage_failed(
                    stage,
                    GENERIC_FAILURE_EXIT_CODE,
                    format!("{:#}", e),
                ));
            }
        };

        self.log_output(&output.stdout, LogLevel::Info);
        self.log_output(&output.stderr, LogLevel::Warning);

        if !output.success() {
            self.record_failure(output.exit_code);
            return Err(RunError::stage_failed(
                stage,
                output.exit_code,
                format!("`{}` exited with code {}", command, output.exit_code),
            ));
        }

        Ok(output)
    }

    /// Forwards command output to the block log, one entry per line
    pub fn log_output(&self, output: &str, level: LogLevel) {
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.log(level, line.to_string());
        }
    }

    /// Adds a log entry to the buffer and mirrors it to tracing
    pub fn add_log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => debug!(label = %self.label, "{}", entry.message),
            LogLevel::Info => info!(label = %self.label, "{}", entry.message),
            LogLevel::Warning => warn!(label = %self.label, "{}", entry.message),
            LogLevel::Error => error!(label = %self.label, "{}", entry.message),
        }
        self.log_buffer.add_entry(entry);
    }

    pub fn log(&self, level: LogLevel, message: String) {
        self.add_log(LogEntry::now(level, message));
    }

    pub fn log_info(&self, message: String) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_error(&self, message: String) {
        self.log(LogLevel::Error, message);
    }

    /// Returns all buffered entries and clears the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        self.log_buffer.drain()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::executor::HostExecutor;
    use crate::service::InMemoryLogBuffer;

    /// Host context rooted at `workspace`
    pub fn host_context(workspace: &Path, source_dir: Option<PathBuf>) -> Arc<Context> {
        let mut vars = BTreeMap::new();
        vars.insert("WORKSPACE".to_string(), workspace.display().to_string());
        vars.insert("NODE_NAME".to_string(), "local".to_string());
        vars.insert("NODE_LABEL".to_string(), "py35".to_string());

        Context::new(ContextParts {
            run_id: Uuid::new_v4(),
            label: "py35".to_string(),
            node: Node::local(),
            workspace: workspace.to_path_buf(),
            executor: Box::new(HostExecutor::new(workspace.to_path_buf(), vars.clone(), "sh")),
            log_buffer: Arc::new(InMemoryLogBuffer::new()),
            vars,
            source_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::host_context;
    use super::*;

    #[test]
    fn test_sh_success_logs_output() {
        let workspace = tempfile::tempdir().unwrap();
        let context = host_context(workspace.path(), None);

        context.sh("Build", "echo one; echo two", None).unwrap();

        let logs = context.drain_logs();
        let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["+ echo one; echo two", "one", "two"]);
        assert_eq!(context.take_failure(), None);
    }

    #[test]
    fn test_sh_failure_records_exit_code() {
        let workspace = tempfile::tempdir().unwrap();
        let context = host_context(workspace.path(), None);

        let err = context
            .sh("Test/unit", "echo broken >&2; exit 4", None)
            .unwrap_err();

        assert_eq!(err.exit_code(), 4);
        assert_eq!(context.take_failure(), Some(4));
        assert_eq!(context.take_failure(), None);

        let logs = context.drain_logs();
        assert!(
            logs.iter()
                .any(|l| l.level == LogLevel::Warning && l.message == "broken")
        );
    }

    #[test]
    fn test_sh_launch_failure_is_generic() {
        let workspace = tempfile::tempdir().unwrap();
        let context = host_context(workspace.path(), None);

        let err = context.sh("Build", "true", Some("missing-dir")).unwrap_err();
        assert_eq!(err.exit_code(), GENERIC_FAILURE_EXIT_CODE);
    }

    #[test]
    fn test_current_dir_round_trip() {
        let workspace = tempfile::tempdir().unwrap();
        let context = host_context(workspace.path(), None);

        assert_eq!(context.current_dir(), None);
        context.set_current_dir(Some("cli".to_string()));
        assert_eq!(context.current_dir().as_deref(), Some("cli"));
    }
}
