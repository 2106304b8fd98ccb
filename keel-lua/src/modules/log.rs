//! Logging module for Keel Lua scripts
//!
//! The module is generic over a `LogSink` so the runner can route script
//! logs into a block's log buffer while tools that only parse pipelines can
//! plug in a no-op sink.

use crate::module::{KeelModule, ModuleMetadata};
use keel_core::domain::log::LogLevel;
use mlua::prelude::*;
use std::sync::{Arc, Mutex};

/// Stubs for the `log` module
pub const STUBS: &str = r#"---@meta

---Logging module for Keel pipelines
---@class log
log = {}

---Log a debug message
---@param msg string The message to log
function log.debug(msg) end

---Log an info message
---@param msg string The message to log
function log.info(msg) end

---Log a warning message
---@param msg string The message to log
function log.warning(msg) end

---Log an error message
---@param msg string The message to log
function log.error(msg) end
"#;

/// Destination of log messages written by scripts
pub trait LogSink: Send + Sync {
    fn write(&mut self, level: LogLevel, message: &str);
}

/// Logging module, generic over its sink
pub struct LogModule<S: LogSink> {
    sink: Arc<Mutex<S>>,
}

impl<S: LogSink> LogModule<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl<S: LogSink + 'static> KeelModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        let levels = [
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warning", LogLevel::Warning),
            ("error", LogLevel::Error),
        ];

        for (name, level) in levels {
            let sink = self.sink.clone();
            log_table.set(
                name,
                lua.create_function(move |_, msg: String| {
                    sink.lock()
                        .map_err(|e| LuaError::RuntimeError(format!("Failed to lock sink: {}", e)))?
                        .write(level, &msg);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        STUBS.to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Logging functionality for Keel pipelines",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestLogSink {
        messages: Arc<Mutex<Vec<(LogLevel, String)>>>,
    }

    impl TestLogSink {
        fn new() -> (Self, Arc<Mutex<Vec<(LogLevel, String)>>>) {
            let messages = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    messages: messages.clone(),
                },
                messages,
            )
        }
    }

    impl LogSink for TestLogSink {
        fn write(&mut self, level: LogLevel, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }

    #[test]
    fn test_log_module_registration() {
        let (sink, _messages) = TestLogSink::new();
        let lua = Lua::new();
        let module = LogModule::new(sink);

        assert_eq!(module.id(), "log");
        assert!(module.register(&lua).is_ok());

        let result: bool = lua
            .load("return type(log.debug) == 'function' and type(log.error) == 'function'")
            .eval()
            .unwrap();
        assert!(result);
    }

    #[test]
    fn test_log_all_levels() {
        let (sink, messages) = TestLogSink::new();
        let lua = Lua::new();
        LogModule::new(sink).register(&lua).unwrap();

        lua.load(
            r#"
            log.debug("debug")
            log.info("info")
            log.warning("warning")
            log.error("error")
        "#,
        )
        .exec()
        .unwrap();

        let logs = messages.lock().unwrap();
        assert_eq!(logs.len(), 4);
        assert_eq!(logs[0], (LogLevel::Debug, "debug".to_string()));
        assert_eq!(logs[1].0, LogLevel::Info);
        assert_eq!(logs[2].0, LogLevel::Warning);
        assert_eq!(logs[3], (LogLevel::Error, "error".to_string()));
    }

    #[test]
    fn test_log_module_stubs() {
        let (sink, _messages) = TestLogSink::new();
        let stubs = LogModule::new(sink).stubs();

        assert!(stubs.starts_with("---@meta"));
        assert!(stubs.contains("function log.warning"));
    }
}
