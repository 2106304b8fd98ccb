//! Keel Runner
//!
//! Executes Lua-defined pipelines made of node blocks. For every block the
//! runner acquires a node carrying the block's label, binds and empties the
//! workspace, then runs the block's stages in order, stopping at the first
//! failure.
//!
//! Architecture:
//! - Configuration: settings from `keel.toml`, environment or defaults
//! - Pool: label-matched nodes with bounded executor slots
//! - Workspace: path resolution and cleanup
//! - Executor: host and podman command backends
//! - Lua: runtime modules and stage execution
//! - Runner: block sequencing and result aggregation

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod lua;
pub mod pool;
pub mod runner;
pub mod service;
pub mod workspace;

pub use config::{FailurePolicy, RunnerConfig};
pub use error::RunError;
pub use pool::{NodeLease, NodePool};
pub use runner::PipelineRunner;
