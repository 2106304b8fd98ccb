//! Environment module for reading run variables
//!
//! Scripts never see the process environment directly. The runner hands a
//! `VarProvider` with the variables of the current run (workspace, node,
//! configured env) and the module exposes it read-only.

use crate::module::{KeelModule, ModuleMetadata};
use mlua::prelude::*;
use std::sync::Arc;

/// Stubs for the `env` module
pub const STUBS: &str = r#"---@meta

---Read-only access to the variables of the current run
---(WORKSPACE, NODE_NAME, NODE_LABEL, KEEL_RUN_ID and configured env)
---@class env
env = {}

---Get a variable, or `default` when it is not set
---@param name string
---@param default? string
---@return string?
function env.get(name, default) end

---Get a variable, raising an error when it is not set
---@param name string
---@return string
function env.require(name) end

---Check whether a variable is set
---@param name string
---@return boolean
function env.has(name) end

---All variables as a name -> value table
---@return table<string, string>
function env.all() end

---All variable names
---@return string[]
function env.keys() end
"#;

/// Source of variables for the `env` module
pub trait VarProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn keys(&self) -> Vec<String>;
}

/// Environment module, generic over its variable provider
pub struct EnvModule<V: VarProvider> {
    provider: Arc<V>,
}

impl<V: VarProvider> EnvModule<V> {
    pub fn new(provider: V) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }
}

impl<V: VarProvider + 'static> KeelModule for EnvModule<V> {
    fn id(&self) -> &'static str {
        "env"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let env_table = lua.create_table()?;

        // env.get(name, default?)
        {
            let provider = self.provider.clone();
            env_table.set(
                "get",
                lua.create_function(move |_, (name, default): (String, Option<String>)| {
                    Ok(provider.get(&name).or(default))
                })?,
            )?;
        }

        // env.require(name)
        {
            let provider = self.provider.clone();
            env_table.set(
                "require",
                lua.create_function(move |_, name: String| {
                    provider.get(&name).ok_or_else(|| {
                        LuaError::RuntimeError(format!(
                            "Required environment variable '{}' is not set",
                            name
                        ))
                    })
                })?,
            )?;
        }

        // env.has(name)
        {
            let provider = self.provider.clone();
            env_table.set(
                "has",
                lua.create_function(move |_, name: String| Ok(provider.get(&name).is_some()))?,
            )?;
        }

        // env.all()
        {
            let provider = self.provider.clone();
            env_table.set(
                "all",
                lua.create_function(move |lua, ()| {
                    let table = lua.create_table()?;
                    for key in provider.keys() {
                        if let Some(value) = provider.get(&key) {
                            table.set(key, value)?;
                        }
                    }
                    Ok(table)
                })?,
            )?;
        }

        // env.keys()
        {
            let provider = self.provider.clone();
            env_table.set(
                "keys",
                lua.create_function(move |lua, ()| {
                    let mut keys = provider.keys();
                    keys.sort();
                    lua.create_sequence_from(keys)
                })?,
            )?;
        }

        lua.globals().set(self.id(), env_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        STUBS.to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Run variable access for Keel pipelines",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapProvider(HashMap<String, String>);

    impl VarProvider for MapProvider {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }

        fn keys(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
    }

    fn lua_with_env() -> Lua {
        let mut vars = HashMap::new();
        vars.insert("WORKSPACE".to_string(), "/tmp/ws".to_string());
        vars.insert("NODE_LABEL".to_string(), "py35".to_string());

        let lua = Lua::new();
        EnvModule::new(MapProvider(vars)).register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_env_get_with_default() {
        let lua = lua_with_env();

        let ws: String = lua.load(r#"return env.get("WORKSPACE")"#).eval().unwrap();
        assert_eq!(ws, "/tmp/ws");

        let fallback: String = lua
            .load(r#"return env.get("MISSING", "fallback")"#)
            .eval()
            .unwrap();
        assert_eq!(fallback, "fallback");

        let missing: Option<String> = lua.load(r#"return env.get("MISSING")"#).eval().unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_env_require_and_has() {
        let lua = lua_with_env();

        let label: String = lua.load(r#"return env.require("NODE_LABEL")"#).eval().unwrap();
        assert_eq!(label, "py35");

        let err = lua
            .load(r#"return env.require("MISSING")"#)
            .eval::<String>()
            .unwrap_err();
        assert!(err.to_string().contains("MISSING"));

        let has: bool = lua.load(r#"return env.has("WORKSPACE")"#).eval().unwrap();
        assert!(has);
    }

    #[test]
    fn test_env_all_and_keys() {
        let lua = lua_with_env();

        let keys: Vec<String> = lua.load("return env.keys()").eval().unwrap();
        assert_eq!(keys, vec!["NODE_LABEL", "WORKSPACE"]);

        let ws: String = lua.load("return env.all().WORKSPACE").eval().unwrap();
        assert_eq!(ws, "/tmp/ws");
    }
}
