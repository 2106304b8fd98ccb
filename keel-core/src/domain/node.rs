//! Node domain model
//!
//! Represents a worker that node blocks are scheduled onto. A node carries
//! labels (what toolchains it offers), a number of executor slots and a
//! backend that decides how commands are actually launched.

use serde::{Deserialize, Serialize};

/// Label that matches any requested label
pub const ANY_LABEL: &str = "*";

/// A node that can execute node blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique name of the node
    pub name: String,

    /// Labels this node answers to
    #[serde(default)]
    pub labels: Vec<String>,

    /// Number of node blocks that may hold this node at the same time
    #[serde(default = "default_executors")]
    pub executors: usize,

    /// How commands are launched on this node
    #[serde(default)]
    pub backend: NodeBackend,
}

fn default_executors() -> usize {
    1
}

impl Node {
    /// Creates a host node with a single executor
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
            executors: default_executors(),
            backend: NodeBackend::Host,
        }
    }

    /// The node used when no configuration is given: the local host,
    /// answering to every label
    pub fn local() -> Self {
        Self::new("local", vec![ANY_LABEL.to_string()])
    }

    /// Sets the executor count
    pub fn with_executors(mut self, executors: usize) -> Self {
        self.executors = executors;
        self
    }

    /// Sets the backend
    pub fn with_backend(mut self, backend: NodeBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Returns true if this node answers to `label`
    pub fn matches(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == ANY_LABEL || l == label)
    }
}

/// Command launch backend of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeBackend {
    /// Commands run directly on this machine
    #[default]
    Host,

    /// Commands run inside a podman container with the workspace mounted
    Container { image: String },
}

impl std::fmt::Display for NodeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeBackend::Host => write!(f, "host"),
            NodeBackend::Container { image } => write!(f, "container({})", image),
        }
    }
}
