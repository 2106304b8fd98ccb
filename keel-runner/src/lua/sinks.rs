//! Concrete implementations of LogSink and VarProvider for the runner
//!
//! These connect the generic Lua `log` and `env` modules to the context of
//! the node block being executed.

use keel_core::domain::log::LogLevel;
use keel_lua::{LogSink, VarProvider};
use std::sync::Arc;

use crate::context::Context;

/// Log sink writing into the block's log buffer
pub struct ContextLogSink {
    context: Arc<Context>,
}

impl ContextLogSink {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }
}

impl LogSink for ContextLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        self.context.log(level, message.to_string());
    }
}

/// Variable provider exposing the block's variables
pub struct RunVarProvider {
    context: Arc<Context>,
}

impl RunVarProvider {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }
}

impl VarProvider for RunVarProvider {
    fn get(&self, name: &str) -> Option<String> {
        self.context.vars().get(name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.context.vars().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::host_context;

    #[test]
    fn test_log_sink_writes_to_context() {
        let workspace = tempfile::tempdir().unwrap();
        let context = host_context(workspace.path(), None);

        let mut sink = ContextLogSink::new(context.clone());
        sink.write(LogLevel::Warning, "careful");

        let logs = context.drain_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert_eq!(logs[0].message, "careful");
    }

    #[test]
    fn test_var_provider_reads_context_vars() {
        let workspace = tempfile::tempdir().unwrap();
        let context = host_context(workspace.path(), None);
        let provider = RunVarProvider::new(context);

        assert_eq!(provider.get("NODE_LABEL").as_deref(), Some("py35"));
        assert_eq!(provider.get("HOME"), None);
        assert!(provider.keys().contains(&"WORKSPACE".to_string()));
    }
}
