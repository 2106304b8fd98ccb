//! Keel Core
//!
//! Core types for the Keel pipeline runner.
//!
//! This crate contains the domain types shared by the Lua definition layer,
//! the runner and the CLI: pipeline metadata, node descriptors, run results
//! and log entries.

pub mod domain;
