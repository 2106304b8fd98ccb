use anyhow::Result;
use mlua::prelude::*;

/// Trait for Keel Lua modules.
///
/// Each module exposes functionality to pipeline scripts running in the
/// sandbox. A module owns a global table named after its `id()` and is able
/// to describe itself to the Lua language server through `stubs()`.
///
/// # Example
///
/// ```rust
/// use keel_lua::module::KeelModule;
/// use mlua::prelude::*;
///
/// struct ClockModule;
///
/// impl KeelModule for ClockModule {
///     fn id(&self) -> &'static str {
///         "clock"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("zero", lua.create_function(|_, ()| Ok(0))?)?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
///
///     fn stubs(&self) -> String {
///         "---@meta\n---@class clock\nclock = {}\n".to_string()
///     }
/// }
/// ```
pub trait KeelModule: Send + Sync {
    /// Returns the unique identifier for this module.
    ///
    /// The identifier is the name of the global table in Lua, so it must be
    /// a valid Lua identifier and unique within a registry.
    fn id(&self) -> &'static str;

    /// Registers this module's functions into the Lua context.
    ///
    /// Implementations create a table, fill it and set it as the global
    /// named by `id()`.
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// Generates Lua Language Server stubs for this module.
    ///
    /// The stub should start with `---@meta` to mark it as a definition file.
    fn stubs(&self) -> String;

    /// Module metadata (version, description)
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "0.1.0",
            description: "",
        }
    }
}

/// Metadata about a Keel module
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    pub id: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

/// Registry of modules to load into an execution sandbox
pub struct ModuleRegistry {
    modules: Vec<Box<dyn KeelModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registers a module
    ///
    /// # Errors
    /// Fails if a module with the same id is already registered
    pub fn register<M: KeelModule + 'static>(&mut self, module: M) -> Result<()> {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            anyhow::bail!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
        Ok(())
    }

    pub fn modules(&self) -> &[Box<dyn KeelModule>] {
        &self.modules
    }

    /// Registers all modules into a Lua context, stopping at the first error
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }

}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
