//! Runner configuration
//!
//! Settings come from three layers, later ones winning:
//! 1. built-in defaults (one host node answering to every label)
//! 2. an optional `keel.toml`
//! 3. environment variables

use anyhow::{Context, Result};
use keel_core::domain::node::{Node, NodeBackend};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Config file looked up in the current directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "keel.toml";

/// What to do with later node blocks once one has failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Skip every remaining block
    #[default]
    FailFast,
    /// Attempt every block regardless
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Ok(Self::FailFast),
            "continue" | "keep-going" => Ok(Self::Continue),
            other => anyhow::bail!(
                "Unknown failure policy '{}', expected 'fail-fast' or 'continue'",
                other
            ),
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Workspace used by blocks that do not name one (`WORKSPACE`)
    pub workspace: Option<PathBuf>,

    /// Base directory for relative and generated workspace paths
    pub workspace_root: PathBuf,

    pub failure_policy: FailurePolicy,

    /// Maximum time to wait for a free node, unbounded when `None`
    pub acquire_timeout: Option<Duration>,

    pub nodes: Vec<Node>,

    /// Extra variables exported to every command and to the `env` module
    pub env: BTreeMap<String, String>,

    /// Directory copied into the workspace by `scm.checkout()`
    pub source_dir: Option<PathBuf>,

    /// Shell used for `sh` stages and `process.sh`
    pub shell: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            workspace_root: PathBuf::from(".keel").join("workspaces"),
            failure_policy: FailurePolicy::FailFast,
            acquire_timeout: None,
            nodes: vec![Node::local()],
            env: BTreeMap::new(),
            source_dir: None,
            shell: "sh".to_string(),
        }
    }
}

/// On-disk layout of `keel.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    workspace_root: Option<PathBuf>,
    failure_policy: Option<FailurePolicy>,
    acquire_timeout_secs: Option<u64>,
    shell: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    nodes: Vec<Node>,
}

impl RunnerConfig {
    /// Loads configuration for a run
    ///
    /// Reads `path`, or `$KEEL_CONFIG`, or `./keel.toml` when it exists,
    /// then applies environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("KEEL_CONFIG").map(PathBuf::from));

        let config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        let config = config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("Path [{}] is not a file", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to open file [{}]", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parses TOML configuration on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let mut config = Self::default();

        if let Some(root) = file.workspace_root {
            config.workspace_root = root;
        }
        if let Some(policy) = file.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(secs) = file.acquire_timeout_secs {
            config.acquire_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(shell) = file.shell {
            config.shell = shell;
        }
        config.env = file.env;
        if !file.nodes.is_empty() {
            config.nodes = file.nodes;
        }

        Ok(config)
    }

    /// Applies environment overrides
    ///
    /// Recognised variables:
    /// - WORKSPACE (default workspace for blocks without one)
    /// - KEEL_WORKSPACE_ROOT
    /// - KEEL_FAILURE_POLICY (`fail-fast` or `continue`)
    /// - KEEL_ACQUIRE_TIMEOUT (seconds)
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workspace) = lookup("WORKSPACE").filter(|v| !v.is_empty()) {
            self.workspace = Some(PathBuf::from(workspace));
        }

        if let Some(root) = lookup("KEEL_WORKSPACE_ROOT").filter(|v| !v.is_empty()) {
            self.workspace_root = PathBuf::from(root);
        }

        if let Some(policy) = lookup("KEEL_FAILURE_POLICY") {
            self.failure_policy = policy.parse()?;
        }

        if let Some(timeout) = lookup("KEEL_ACQUIRE_TIMEOUT") {
            let secs = timeout
                .trim()
                .parse::<u64>()
                .with_context(|| format!("KEEL_ACQUIRE_TIMEOUT must be seconds, got '{}'", timeout))?;
            self.acquire_timeout = Some(Duration::from_secs(secs));
        }

        Ok(self)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("at least one node must be configured");
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                anyhow::bail!("node name cannot be empty");
            }
            if !names.insert(node.name.as_str()) {
                anyhow::bail!("node '{}' is configured more than once", node.name);
            }
            if node.labels.is_empty() {
                anyhow::bail!("node '{}' must have at least one label", node.name);
            }
            if node.executors == 0 {
                anyhow::bail!("node '{}' must have at least one executor", node.name);
            }
            if node.executors > Semaphore::MAX_PERMITS {
                anyhow::bail!(
                    "node '{}' has {} executors, at most {} are supported",
                    node.name,
                    node.executors,
                    Semaphore::MAX_PERMITS
                );
            }
            if let NodeBackend::Container { image } = &node.backend {
                if image.trim().is_empty() {
                    anyhow::bail!("node '{}' has an empty container image", node.name);
                }
            }
        }

        if self.acquire_timeout == Some(Duration::ZERO) {
            anyhow::bail!("acquire_timeout must be greater than 0");
        }

        if self.shell.trim().is_empty() {
            anyhow::bail!("shell cannot be empty");
        }

        Ok(())
    }
}
