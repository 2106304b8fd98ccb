//! Error types for pipeline execution

use keel_core::domain::run::GENERIC_FAILURE_EXIT_CODE;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a node block
///
/// Every variant is reported to the user as a failed stage or block; only
/// `StageFailed` carries a command exit code.
#[derive(Debug, Error)]
pub enum RunError {
    /// A stage action failed
    #[error("Stage '{stage}' failed with exit code {exit_code}: {message}")]
    StageFailed {
        stage: String,
        exit_code: i32,
        message: String,
    },

    /// The workspace could not be emptied
    #[error("Failed to clean workspace {path:?}: {source}")]
    WorkspaceCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No configured node answers to the label
    #[error("No node carries label '{0}'")]
    NoMatchingNode(String),

    /// Every matching node stayed busy for the whole timeout
    #[error("Timed out after {timeout:?} waiting for a node labelled '{label}'")]
    AcquireTimeout { label: String, timeout: Duration },

    /// A host node lacks tools the pipeline requires
    #[error("Node '{node}' is missing required tools: {}", .missing.join(", "))]
    MissingTools { node: String, missing: Vec<String> },

    /// The pipeline could not be loaded for execution
    #[error("Invalid pipeline definition: {0}")]
    Definition(String),
}

impl RunError {
    pub fn stage_failed(stage: impl Into<String>, exit_code: i32, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Failure detail without the stage prefix
    pub fn detail(&self) -> String {
        match self {
            Self::StageFailed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Exit code this error contributes to the run
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StageFailed { exit_code, .. } => *exit_code,
            _ => GENERIC_FAILURE_EXIT_CODE,
        }
    }
}
