//! Run result types
//!
//! A run is one execution of a pipeline. It is made of one result per node
//! block, each holding one outcome per leaf stage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::log::LogEntry;

/// Exit code reported for failures that are not a command exit
/// (workspace cleanup, node acquisition, Lua errors)
pub const GENERIC_FAILURE_EXIT_CODE: i32 = 1;

/// Execution status of a run, block or stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "Pending"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
            RunStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Outcome of a single leaf stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Slash-joined stage path (`Test/syntax`)
    pub path: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn succeeded(path: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            path: path.into(),
            status: RunStatus::Succeeded,
            exit_code: Some(0),
            duration_ms,
            error: None,
        }
    }

    pub fn failed(
        path: impl Into<String>,
        exit_code: i32,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            path: path.into(),
            status: RunStatus::Failed,
            exit_code: Some(exit_code),
            duration_ms,
            error: Some(error.into()),
        }
    }

    pub fn skipped(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: RunStatus::Skipped,
            exit_code: None,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Result of one node block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResult {
    pub label: String,
    /// Name of the node that executed the block, if one was acquired
    pub node: Option<String>,
    pub workspace: Option<PathBuf>,
    pub status: RunStatus,
    pub exit_code: i32,
    pub error: Option<String>,
    pub stages: Vec<StageOutcome>,
    pub logs: Vec<LogEntry>,
}

impl BlockResult {
    /// A block that was never started
    pub fn skipped(label: impl Into<String>, stage_paths: Vec<String>) -> Self {
        Self {
            label: label.into(),
            node: None,
            workspace: None,
            status: RunStatus::Skipped,
            exit_code: 0,
            error: None,
            stages: stage_paths.into_iter().map(StageOutcome::skipped).collect(),
            logs: Vec::new(),
        }
    }

    /// Builds a block result from stage outcomes.
    ///
    /// The block fails with the exit code of its first failed stage.
    pub fn from_stages(
        label: impl Into<String>,
        node: String,
        workspace: PathBuf,
        stages: Vec<StageOutcome>,
        logs: Vec<LogEntry>,
    ) -> Self {
        let failed = stages.iter().find(|s| s.status == RunStatus::Failed);
        let (status, exit_code, error) = match failed {
            Some(stage) => (
                RunStatus::Failed,
                stage.exit_code.unwrap_or(GENERIC_FAILURE_EXIT_CODE),
                Some(format!(
                    "Stage '{}' failed: {}",
                    stage.path,
                    stage.error.as_deref().unwrap_or("unknown error")
                )),
            ),
            None => (RunStatus::Succeeded, 0, None),
        };

        Self {
            label: label.into(),
            node: Some(node),
            workspace: Some(workspace),
            status,
            exit_code,
            error,
            stages,
            logs,
        }
    }

    /// A block that failed before any stage could run
    pub fn aborted(
        label: impl Into<String>,
        exit_code: i32,
        error: impl Into<String>,
        stage_paths: Vec<String>,
    ) -> Self {
        Self {
            label: label.into(),
            node: None,
            workspace: None,
            status: RunStatus::Failed,
            exit_code,
            error: Some(error.into()),
            stages: stage_paths.into_iter().map(StageOutcome::skipped).collect(),
            logs: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Result of a whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    /// Exit code of the first failing command, 0 on success
    pub exit_code: i32,
    pub blocks: Vec<BlockResult>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunResult {
    /// Aggregates block results in declaration order
    pub fn from_blocks(
        run_id: Uuid,
        pipeline: impl Into<String>,
        blocks: Vec<BlockResult>,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let first_failure = blocks.iter().find(|b| b.is_failed());
        let (status, exit_code) = match first_failure {
            Some(block) => (RunStatus::Failed, block.exit_code),
            None => (RunStatus::Succeeded, 0),
        };

        Self {
            run_id,
            pipeline: pipeline.into(),
            status,
            exit_code,
            blocks,
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}
