//! Keel Lua Infrastructure
//!
//! This crate provides the Lua layer of the Keel pipeline runner:
//! - Module trait and registry for Lua modules
//! - Sandbox creation with the `pipeline` definition helpers
//! - Core module implementations (log, env)
//! - Pipeline parsing, both metadata-only and with executable stage functions

pub mod definition;
pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;

pub use definition::{
    NodeBlockDefinition, PipelineDefinition, StageAction, StageDefinition,
    parse_pipeline_definition,
};
pub use module::{KeelModule, ModuleMetadata, ModuleRegistry};
pub use modules::{EnvModule, LogModule, LogSink, VarProvider};
pub use parser::parse_pipeline_metadata;
pub use sandbox::{create_execution_sandbox, create_metadata_sandbox, create_sandbox};

pub use keel_core::domain::pipeline::{NodeBlockMetadata, PipelineMetadata, StageMetadata};
