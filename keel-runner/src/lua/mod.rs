//! Lua execution infrastructure for the runner
//!
//! This module provides:
//! - Runtime modules bound to a node block's context (process, scm)
//! - Sinks connecting the generic `log` and `env` modules to the context
//! - Stage execution for a node block

pub mod executor;
pub mod modules;
pub mod sinks;
