//! Configuration module
//!
//! Global CLI options shared by every command.

use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Runner configuration file (`keel.toml`)
    pub config_path: Option<PathBuf>,
}
