//! Runtime modules for pipeline scripts
//!
//! `process` and `scm` live here because they need a node block's context.
//! `log` and `env` come from keel-lua and are wired up through the sinks.

pub mod process;
pub mod scm;

pub use process::ProcessModule;
pub use scm::ScmModule;

use anyhow::Result;
use keel_lua::{EnvModule, LogModule, ModuleRegistry};
use std::sync::Arc;

use crate::context::Context;
use crate::lua::sinks::{ContextLogSink, RunVarProvider};

/// Registry with every runtime module bound to `context`
pub fn runtime_registry(context: &Arc<Context>) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    registry.register(LogModule::new(ContextLogSink::new(context.clone())))?;
    registry.register(EnvModule::new(RunVarProvider::new(context.clone())))?;
    registry.register(ProcessModule::new(context.clone()))?;
    registry.register(ScmModule::new(context.clone()))?;
    Ok(registry)
}

/// Language server stubs for every global available to pipeline files
///
/// Returned as `(file name, contents)` pairs.
pub fn runtime_stubs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("pipeline.lua", keel_lua::sandbox::PIPELINE_STUBS),
        ("log.lua", keel_lua::modules::log::STUBS),
        ("env.lua", keel_lua::modules::env::STUBS),
        ("process.lua", process::STUBS),
        ("scm.lua", scm::STUBS),
    ]
}
