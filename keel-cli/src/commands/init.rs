//! Init command handlers
//!
//! Handles initialization of the development environment: `.luarc.json`
//! for the Lua language server and stub files for the pipeline globals.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use keel_runner::lua::modules::runtime_stubs;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory (relative to the output directory) holding the stubs
const STUBS_DIR: &str = ".keel/stubs";

/// Init subcommands
#[derive(Subcommand)]
pub enum InitCommands {
    /// Generate Lua development files (.luarc.json and stubs)
    Lua {
        /// Output directory for generated files
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Generate only .luarc.json
        #[arg(long, conflicts_with = "stubs_only")]
        config_only: bool,

        /// Generate only stub files
        #[arg(long)]
        stubs_only: bool,
    },
}

/// Handle init commands
pub fn handle_init_command(command: InitCommands) -> Result<i32> {
    match command {
        InitCommands::Lua {
            output,
            config_only,
            stubs_only,
        } => {
            generate_lua_dev_files(&output, config_only, stubs_only)?;
            Ok(0)
        }
    }
}

/// Generate Lua development files
fn generate_lua_dev_files(output_path: &Path, config_only: bool, stubs_only: bool) -> Result<()> {
    fs::create_dir_all(output_path)
        .with_context(|| format!("Failed to create output directory {:?}", output_path))?;

    if !stubs_only {
        generate_luarc_json(output_path)?;
    }

    if !config_only {
        generate_stub_files(output_path)?;
    }

    println!("{}", "✓ Lua development files generated!".green().bold());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Install Lua Language Server in your editor");
    println!("  2. Open your pipeline file to see autocomplete and type hints");
    println!(
        "  3. Use {} to check it",
        "keel validate <pipeline.lua>".cyan()
    );

    Ok(())
}

/// Contents of `.luarc.json`
fn luarc_json() -> String {
    let globals: Vec<String> = runtime_stubs()
        .iter()
        .map(|(file, _)| format!("\"{}\"", file.trim_end_matches(".lua")))
        .collect();

    format!(
        r#"{{
  "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
  "runtime": {{
    "version": "Lua 5.4"
  }},
  "diagnostics": {{
    "globals": [{}]
  }},
  "workspace": {{
    "library": ["{}"],
    "checkThirdParty": false
  }},
  "completion": {{
    "callSnippet": "Both"
  }}
}}
"#,
        globals.join(", "),
        STUBS_DIR
    )
}

/// Generate .luarc.json for Lua LSP configuration
fn generate_luarc_json(output_path: &Path) -> Result<()> {
    let luarc_path = output_path.join(".luarc.json");

    fs::write(&luarc_path, luarc_json())
        .with_context(|| format!("Failed to write .luarc.json to {:?}", luarc_path))?;

    println!("  {} .luarc.json", "Created".green());

    Ok(())
}

/// Generate one stub file per pipeline global
fn generate_stub_files(output_path: &Path) -> Result<()> {
    let stubs_dir = output_path.join(STUBS_DIR);
    fs::create_dir_all(&stubs_dir)
        .with_context(|| format!("Failed to create stubs directory at {:?}", stubs_dir))?;

    for (file_name, contents) in runtime_stubs() {
        let stub_path = stubs_dir.join(file_name);

        fs::write(&stub_path, contents)
            .with_context(|| format!("Failed to write stub file {:?}", stub_path))?;

        println!("  {} {}", "Created".green(), file_name);
    }

    println!(
        "  {} in {}",
        "Stubs ready".green(),
        stubs_dir.display().to_string().cyan()
    );

    Ok(())
}
