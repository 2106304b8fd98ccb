//! Core Keel modules for Lua scripts
//!
//! These modules are trait-based so each context can supply its own backing:
//! - Runner: block log buffer and run variables
//! - CLI: no-op implementations for stub generation

pub mod env;
pub mod log;

pub use env::{EnvModule, VarProvider};
pub use log::{LogModule, LogSink};
