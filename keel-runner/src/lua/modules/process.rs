//! Process module implementation for the runner
//!
//! Provides command execution to Lua scripts. Commands go through the
//! block's executor, so they run on the host or inside the node's container
//! with the workspace as working directory.

use keel_core::domain::log::LogLevel;
use keel_lua::{KeelModule, ModuleMetadata};
use mlua::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::RunError;
use crate::executor::join_dir;

/// Stubs for the `process` module
pub const STUBS: &str = r#"---@meta

---Command execution on the current node
---@class process
process = {}

---Run a shell command, raising an error when it exits non-zero.
---The exit code becomes the stage's exit code.
---@param cmd string Shell command
---@param opts? {dir?: string} Working directory relative to the stage directory
function process.sh(cmd, opts) end

---@class ProcessRunOptions
---@field cmd string Program to run
---@field args? string[] Arguments
---@field dir? string Working directory relative to the stage directory
---@field capture_stdout? boolean Return stdout instead of logging it
---@field capture_stderr? boolean Return stderr instead of logging it
---@field stdout_level? "debug"|"info"|"warning"|"error"
---@field stderr_level? "debug"|"info"|"warning"|"error"

---@class ProcessResult
---@field exit_code integer
---@field stdout? string
---@field stderr? string

---Run a program without raising on failure
---@param options ProcessRunOptions
---@return ProcessResult
function process.run(options) end
"#;

/// `process` module bound to a node block
pub struct ProcessModule {
    context: Arc<Context>,
}

impl ProcessModule {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }
}

impl KeelModule for ProcessModule {
    fn id(&self) -> &'static str {
        "process"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let process_table = lua.create_table()?;

        // process.sh(cmd, opts?)
        {
            let context = self.context.clone();
            process_table.set(
                "sh",
                lua.create_function(move |_, (cmd, opts): (String, Option<LuaTable>)| {
                    let dir: Option<String> = match &opts {
                        Some(opts) => opts.get("dir")?,
                        None => None,
                    };
                    let dir = join_dir(context.current_dir().as_deref(), dir.as_deref());

                    match context.sh("process.sh", &cmd, dir.as_deref()) {
                        Ok(_) => Ok(()),
                        Err(RunError::StageFailed { message, .. }) => {
                            Err(LuaError::RuntimeError(message))
                        }
                        Err(other) => Err(LuaError::RuntimeError(other.to_string())),
                    }
                })?,
            )?;
        }

        // process.run(options)
        {
            let context = self.context.clone();
            process_table.set(
                "run",
                lua.create_function(move |lua_ctx, options: LuaTable| {
                    let cmd: String = options.get("cmd").map_err(|_| {
                        LuaError::RuntimeError("process.run requires 'cmd' field".to_string())
                    })?;

                    let args: Vec<String> = match options.get::<Option<LuaTable>>("args")? {
                        Some(table) => table.sequence_values::<String>().collect::<LuaResult<_>>()?,
                        None => Vec::new(),
                    };

                    let capture_stdout: bool =
                        options.get::<Option<bool>>("capture_stdout")?.unwrap_or(false);
                    let capture_stderr: bool =
                        options.get::<Option<bool>>("capture_stderr")?.unwrap_or(false);
                    let stdout_level: String = options
                        .get::<Option<String>>("stdout_level")?
                        .unwrap_or_else(|| "info".to_string());
                    let stderr_level: String = options
                        .get::<Option<String>>("stderr_level")?
                        .unwrap_or_else(|| "error".to_string());
                    let dir: Option<String> = options.get("dir")?;
                    let dir = join_dir(context.current_dir().as_deref(), dir.as_deref());

                    debug!("Executing process: {} {:?}", cmd, args);

                    let output = context
                        .executor()
                        .exec(&cmd, &args, dir.as_deref())
                        .map_err(|e| {
                            LuaError::RuntimeError(format!("Failed to execute command: {:#}", e))
                        })?;

                    if !capture_stdout {
                        context.log_output(&output.stdout, parse_level(&stdout_level));
                    }
                    if !capture_stderr {
                        context.log_output(&output.stderr, parse_level(&stderr_level));
                    }

                    let result = lua_ctx.create_table()?;
                    result.set("exit_code", output.exit_code)?;
                    if capture_stdout {
                        result.set("stdout", output.stdout)?;
                    }
                    if capture_stderr {
                        result.set("stderr", output.stderr)?;
                    }

                    Ok(result)
                })?,
            )?;
        }

        lua.globals().set(self.id(), process_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        STUBS.to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Command execution on the node of a block",
        }
    }
}

fn parse_level(level: &str) -> LogLevel {
    match level.to_lowercase().as_str() {
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warning" | "warn" => LogLevel::Warning,
        "error" => LogLevel::Error,
        other => {
            warn!("Unknown log level '{}', defaulting to info", other);
            LogLevel::Info
        }
    }
}
