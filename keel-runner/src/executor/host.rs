//! Host command execution

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use super::{CommandExecutor, CommandOutput, exit_code_of};

/// Runs commands directly on this machine, inside the workspace
pub struct HostExecutor {
    workspace: PathBuf,
    env: BTreeMap<String, String>,
    shell: String,
}

impl HostExecutor {
    pub fn new(workspace: PathBuf, env: BTreeMap<String, String>, shell: &str) -> Self {
        Self {
            workspace,
            env,
            shell: shell.to_string(),
        }
    }

    fn working_dir(&self, dir: Option<&str>) -> PathBuf {
        match dir {
            Some(dir) => self.workspace.join(dir),
            None => self.workspace.clone(),
        }
    }
}

impl CommandExecutor for HostExecutor {
    fn exec(&self, program: &str, args: &[String], dir: Option<&str>) -> Result<CommandOutput> {
        let working_dir = self.working_dir(dir);
        debug!("Executing on host in {}: {} {:?}", working_dir.display(), program, args);

        let output = Command::new(program)
            .args(args)
            .current_dir(&working_dir)
            .envs(&self.env)
            .output()
            .with_context(|| {
                format!("Failed to execute '{}' in {}", program, working_dir.display())
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: exit_code_of(output.status),
        };

        debug!(
            "Command finished: exit_code={}, stdout_len={}, stderr_len={}",
            result.exit_code,
            result.stdout.len(),
            result.stderr.len()
        );

        Ok(result)
    }

    fn shell(&self, script: &str, dir: Option<&str>) -> Result<CommandOutput> {
        self.exec(&self.shell, &["-c".to_string(), script.to_string()], dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(workspace: &std::path::Path) -> HostExecutor {
        let mut env = BTreeMap::new();
        env.insert("KEEL_TEST_VAR".to_string(), "from-config".to_string());
        HostExecutor::new(workspace.to_path_buf(), env, "sh")
    }

    #[test]
    fn test_shell_runs_in_workspace() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::create_dir(workspace.path().join("cli")).unwrap();
        let executor = executor(workspace.path());

        executor.shell("echo data > marker.txt", Some("cli")).unwrap();
        assert!(workspace.path().join("cli/marker.txt").exists());
    }

    #[test]
    fn test_shell_reports_exit_code_and_output() {
        let workspace = tempfile::tempdir().unwrap();
        let executor = executor(workspace.path());

        let output = executor
            .shell("echo out; echo err >&2; exit 3", None)
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn test_env_is_exported() {
        let workspace = tempfile::tempdir().unwrap();
        let executor = executor(workspace.path());

        let output = executor.shell("printf %s \"$KEEL_TEST_VAR\"", None).unwrap();
        assert_eq!(output.stdout, "from-config");
    }

    #[test]
    fn test_exec_passes_arguments_verbatim() {
        let workspace = tempfile::tempdir().unwrap();
        let executor = executor(workspace.path());

        let output = executor
            .exec("printf", &["%s|".to_string(), "a b".to_string()], None)
            .unwrap();
        assert_eq!(output.stdout, "a b|");
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let workspace = tempfile::tempdir().unwrap();
        let executor = executor(workspace.path());

        assert!(executor.exec("keel-no-such-program", &[], None).is_err());
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let workspace = tempfile::tempdir().unwrap();
        let executor = executor(workspace.path());

        assert!(executor.shell("true", Some("does-not-exist")).is_err());
    }
}
