//! Core domain types
//!
//! This module contains the core domain structures used across Keel crates.
//! They describe what a pipeline looks like (metadata), where it runs
//! (nodes) and what happened when it ran (run results, logs).

pub mod log;
pub mod node;
pub mod pipeline;
pub mod run;
