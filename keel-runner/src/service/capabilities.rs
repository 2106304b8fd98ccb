//! Capabilities service
//!
//! Discovers which command-line tools are reachable on the host and checks a
//! pipeline's `requires` list against them before a host node block starts.

use std::collections::BTreeSet;
use tracing::{debug, info};

/// Tools probed by `keel nodes` in addition to the configured extras
pub const WELL_KNOWN_TOOLS: &[&str] = &["sh", "make", "tox", "python3", "go", "git", "podman"];

/// Service trait for capability discovery and validation
pub trait CapabilitiesService: Send + Sync {
    /// Tools found on this machine, sorted
    fn discover(&self) -> Vec<String>;

    /// Required tools that cannot be found, in `requires` order
    fn missing(&self, requires: &[String]) -> Vec<String>;

    /// Returns true if every required tool is available
    fn check_compatibility(&self, requires: &[String]) -> bool {
        self.missing(requires).is_empty()
    }
}

/// Looks tools up on `PATH`
#[derive(Debug, Clone, Default)]
pub struct StandardCapabilitiesService {
    extra_tools: Vec<String>,
}

impl StandardCapabilitiesService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also probe `tools` during discovery
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.extra_tools.extend(tools);
        self
    }

    fn is_available(tool: &str) -> bool {
        match which::which(tool) {
            Ok(path) => {
                debug!("Found {} at {}", tool, path.display());
                true
            }
            Err(_) => false,
        }
    }
}

impl CapabilitiesService for StandardCapabilitiesService {
    fn discover(&self) -> Vec<String> {
        let candidates: BTreeSet<&str> = WELL_KNOWN_TOOLS
            .iter()
            .copied()
            .chain(self.extra_tools.iter().map(String::as_str))
            .collect();

        let found: Vec<String> = candidates
            .into_iter()
            .filter(|tool| Self::is_available(tool))
            .map(str::to_string)
            .collect();

        info!("Discovered {} tool(s)", found.len());
        found
    }

    fn missing(&self, requires: &[String]) -> Vec<String> {
        requires
            .iter()
            .filter(|tool| !Self::is_available(tool))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_is_discovered() {
        let tools = StandardCapabilitiesService::new().discover();
        assert!(tools.contains(&"sh".to_string()));

        let mut sorted = tools.clone();
        sorted.sort();
        assert_eq!(tools, sorted);
    }

    #[test]
    fn test_missing_tools() {
        let service = StandardCapabilitiesService::new();
        let requires = vec![
            "sh".to_string(),
            "keel-definitely-not-installed".to_string(),
        ];

        assert_eq!(service.missing(&requires), vec!["keel-definitely-not-installed"]);
        assert!(!service.check_compatibility(&requires));
        assert!(service.check_compatibility(&["sh".to_string()]));
    }

    #[test]
    fn test_extra_tools_are_probed() {
        let tools = StandardCapabilitiesService::new()
            .with_tools(vec!["keel-definitely-not-installed".to_string()])
            .discover();
        assert!(!tools.contains(&"keel-definitely-not-installed".to_string()));
    }
}
