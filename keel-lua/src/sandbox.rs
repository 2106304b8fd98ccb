//! Lua sandbox creation
//!
//! Pipeline definitions are evaluated in a restricted Lua state without I/O,
//! `os`, `package` or `debug`. Commands and file access are only reachable
//! through the modules the runner registers (process, scm, env, log).
//!
//! The `pipeline` helper table is always present since every definition may
//! use it.

use anyhow::{Context, Result};
use mlua::{Function, Lua, LuaOptions, Result as LuaResult, StdLib, Table, Value};

use crate::module::ModuleRegistry;

/// Stubs for the `pipeline` helper table
pub const PIPELINE_STUBS: &str = r#"---@meta

---Pipeline definition helpers
---@class pipeline
pipeline = {}

---Return a pipeline definition unchanged (marks the intent of the table)
---@param definition table
---@return table
function pipeline.define(definition) end

---Create a node block builder bound to a label and optional workspace.
---The returned function wraps a list of stages into a node block.
---@param label string Node label to acquire
---@param workspace? string Workspace path (defaults to $WORKSPACE)
---@return fun(stages: table): table
function pipeline.builder(label, workspace) end

---Declare a stage.
---`action` is a shell command string, a function, or a list of nested stages.
---@param name string Stage name
---@param action string|function|table
---@param opts? {dir?: string}
---@return table
function pipeline.stage(name, action, opts) end
"#;

/// Create a restricted Lua sandbox
///
/// Only the TABLE, STRING, MATH and COROUTINE standard libraries are loaded
/// and `require`, `dofile` and `loadfile` are removed.
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
        LuaOptions::default(),
    )?;

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    register_pipeline_helpers(&lua)?;

    Ok(lua)
}

/// Sandbox used to read a pipeline's structure without running it
pub fn create_metadata_sandbox() -> LuaResult<Lua> {
    create_sandbox()
}

/// Sandbox with every module of `registry` registered, used to run stages
pub fn create_execution_sandbox(registry: &ModuleRegistry) -> Result<Lua> {
    let lua = create_sandbox().context("Failed to create base sandbox")?;
    registry
        .register_all(&lua)
        .context("Failed to register modules into sandbox")?;
    Ok(lua)
}

fn register_pipeline_helpers(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    pipeline.set(
        "define",
        lua.create_function(|_, definition: Table| Ok(definition))?,
    )?;

    pipeline.set(
        "builder",
        lua.create_function(|lua, (label, workspace): (String, Option<String>)| {
            create_node_builder(lua, label, workspace)
        })?,
    )?;

    pipeline.set(
        "stage",
        lua.create_function(
            |lua, (name, action, opts): (String, Value, Option<Table>)| {
                create_stage(lua, name, action, opts)
            },
        )?,
    )?;

    lua.globals().set("pipeline", pipeline)?;
    Ok(())
}

/// `pipeline.builder(label, workspace)` returns a function wrapping a stage
/// list into `{ label = ..., workspace = ..., stages = ... }`
fn create_node_builder(lua: &Lua, label: String, workspace: Option<String>) -> LuaResult<Function> {
    lua.create_function(move |lua, stages: Table| {
        let block = lua.create_table()?;
        block.set("label", label.as_str())?;
        if let Some(ref workspace) = workspace {
            block.set("workspace", workspace.as_str())?;
        }
        block.set("stages", stages)?;
        Ok(block)
    })
}

fn create_stage(lua: &Lua, name: String, action: Value, opts: Option<Table>) -> LuaResult<Table> {
    let stage = lua.create_table()?;
    stage.set("name", name.as_str())?;

    match action {
        Value::String(command) => stage.set("sh", command)?,
        Value::Function(script) => stage.set("script", script)?,
        Value::Table(stages) => stage.set("stages", stages)?,
        other => {
            return Err(mlua::Error::RuntimeError(format!(
                "Stage '{}' action must be a command string, a function or a list of stages, got {}",
                name,
                other.type_name()
            )));
        }
    }

    if let Some(opts) = opts {
        let dir: Option<String> = opts.get("dir")?;
        if let Some(dir) = dir {
            stage.set("dir", dir)?;
        }
    }

    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_basic_lua() {
        let lua = create_sandbox().unwrap();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua
            .load(r#"return string.format("tox -e %s", "py35-unit")"#)
            .eval()
            .unwrap();
        assert_eq!(result, "tox -e py35-unit");
    }

    #[test]
    fn test_sandbox_no_io() {
        let lua = create_sandbox().unwrap();

        let has_io: bool = lua.load(r#"return io ~= nil"#).eval().unwrap();
        assert!(!has_io);

        let has_os: bool = lua.load(r#"return os ~= nil"#).eval().unwrap();
        assert!(!has_os);
    }

    #[test]
    fn test_sandbox_no_require() {
        let lua = create_sandbox().unwrap();
        let result: LuaResult<()> = lua.load(r#"require("os")"#).exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_sandbox_has_no_runtime_modules() {
        let lua = create_sandbox().unwrap();

        let has_process: bool = lua.load(r#"return process ~= nil"#).eval().unwrap();
        assert!(!has_process);

        let has_log: bool = lua.load(r#"return log ~= nil"#).eval().unwrap();
        assert!(!has_log);
    }

    #[test]
    fn test_stage_helper_maps_action_kinds() {
        let lua = create_sandbox().unwrap();

        let (sh, dir): (String, String) = lua
            .load(
                r#"
            local s = pipeline.stage("Build", "make binary", { dir = "cli" })
            return s.sh, s.dir
        "#,
            )
            .eval()
            .unwrap();
        assert_eq!(sh, "make binary");
        assert_eq!(dir, "cli");

        let is_fn: bool = lua
            .load(r#"return type(pipeline.stage("Run", function() end).script) == "function""#)
            .eval()
            .unwrap();
        assert!(is_fn);

        let nested: i64 = lua
            .load(
                r#"
            local s = pipeline.stage("Test", { pipeline.stage("unit", "tox") })
            return #s.stages
        "#,
            )
            .eval()
            .unwrap();
        assert_eq!(nested, 1);

        let bad: LuaResult<Table> = lua.load(r#"return pipeline.stage("Bad", 42)"#).eval();
        assert!(bad.is_err());
    }

    #[test]
    fn test_builder_wraps_stages_into_node_block() {
        let lua = create_sandbox().unwrap();

        let (label, workspace, count): (String, Option<String>, i64) = lua
            .load(
                r#"
            local py35 = pipeline.builder("py35", "/tmp/ws")
            local block = py35 { pipeline.stage("Build", "make") }
            return block.label, block.workspace, #block.stages
        "#,
            )
            .eval()
            .unwrap();
        assert_eq!(label, "py35");
        assert_eq!(workspace, Some("/tmp/ws".to_string()));
        assert_eq!(count, 1);

        let workspace: Option<String> = lua
            .load(r#"return pipeline.builder("mesos")({}).workspace"#)
            .eval()
            .unwrap();
        assert_eq!(workspace, None);
    }
}
