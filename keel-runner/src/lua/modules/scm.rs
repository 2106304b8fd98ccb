//! Source checkout module
//!
//! `scm.checkout()` copies the pipeline's source directory into the
//! workspace. It is the local counterpart of a VCS checkout step.

use keel_lua::{KeelModule, ModuleMetadata};
use mlua::prelude::*;
use std::sync::Arc;
use tracing::info;

use crate::context::Context;
use crate::workspace::copy_tree;

/// Stubs for the `scm` module
pub const STUBS: &str = r#"---@meta

---Source checkout
---@class scm
scm = {}

---Copy the pipeline's source directory into the workspace.
---`.git`, `target` and `.keel` are skipped.
---@return integer files Number of files copied
function scm.checkout() end
"#;

/// `scm` module bound to a node block
pub struct ScmModule {
    context: Arc<Context>,
}

impl ScmModule {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }
}

impl KeelModule for ScmModule {
    fn id(&self) -> &'static str {
        "scm"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let scm_table = lua.create_table()?;

        let context = self.context.clone();
        scm_table.set(
            "checkout",
            lua.create_function(move |_, ()| {
                let source = context.source_dir().ok_or_else(|| {
                    LuaError::RuntimeError("No source directory configured for checkout".to_string())
                })?;

                let copied = copy_tree(source, &context.workspace).map_err(|e| {
                    LuaError::RuntimeError(format!(
                        "Failed to check out {} into {}: {}",
                        source.display(),
                        context.workspace.display(),
                        e
                    ))
                })?;

                info!("Checked out {} file(s) from {}", copied, source.display());
                context.log_info(format!(
                    "Checked out {} file(s) from {}",
                    copied,
                    source.display()
                ));
                Ok(copied)
            })?,
        )?;

        lua.globals().set(self.id(), scm_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        STUBS.to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Source checkout into the block workspace",
        }
    }
}
