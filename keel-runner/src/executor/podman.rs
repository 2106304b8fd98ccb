//! Podman container execution
//!
//! A container node block gets one long-lived container:
//! - started in `prepare` with the workspace mounted at `/workspace`
//! - commands run through `podman exec`
//! - stopped and removed in `cleanup`, or on drop as a fallback

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{CommandExecutor, CommandOutput, exit_code_of};
use crate::workspace::ensure_dir;

/// Mount point of the workspace inside containers
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Checks if podman is installed and available
pub fn check_podman_available() -> Result<()> {
    let output = Command::new("podman")
        .arg("--version")
        .output()
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

/// Runs commands inside a podman container
pub struct ContainerExecutor {
    run_id: Uuid,
    image: String,
    workspace: PathBuf,
    env: BTreeMap<String, String>,
    shell: String,

    /// Name of the running container, set by `prepare`
    container: Mutex<Option<String>>,
}

impl ContainerExecutor {
    pub fn new(
        run_id: Uuid,
        image: &str,
        workspace: PathBuf,
        mut env: BTreeMap<String, String>,
        shell: &str,
    ) -> Self {
        env.insert("WORKSPACE".to_string(), CONTAINER_WORKSPACE.to_string());
        Self {
            run_id,
            image: image.to_string(),
            workspace,
            env,
            shell: shell.to_string(),
            container: Mutex::new(None),
        }
    }

    /// Name of the container for this run, image and workspace
    pub fn container_name(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.image.hash(&mut hasher);
        self.workspace.hash(&mut hasher);
        let hash = hasher.finish();

        format!("keel-{}-{:x}", self.run_id, hash)
    }

    fn current_container(&self) -> Option<String> {
        self.container
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn working_dir(dir: Option<&str>) -> String {
        match dir {
            Some(dir) if dir.starts_with('/') => dir.to_string(),
            Some(dir) => format!("{}/{}", CONTAINER_WORKSPACE, dir),
            None => CONTAINER_WORKSPACE.to_string(),
        }
    }

    fn start_container(&self) -> Result<String> {
        let container_name = self.container_name();

        ensure_dir(&self.workspace).context("Failed to create workspace directory")?;

        info!(
            "Creating container {} for image {}",
            container_name, self.image
        );

        // The entrypoint is overridden so images with custom entrypoints
        // still just sleep until commands are exec'd into them
        let output = Command::new("podman")
            .arg("run")
            .arg("-d")
            .arg("--name")
            .arg(&container_name)
            .arg("--entrypoint")
            .arg("/bin/sh")
            .arg("-v")
            .arg(format!("{}:{}", self.workspace.display(), CONTAINER_WORKSPACE))
            .arg("-w")
            .arg(CONTAINER_WORKSPACE)
            .arg(&self.image)
            .arg("-c")
            .arg("sleep infinity")
            .output()
            .context("Failed to execute podman run command")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("podman run stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("podman run stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let error_msg = format!(
                "Failed to start container for image {}: exit_code={}, stderr='{}'",
                self.image,
                exit_code_of(output.status),
                stderr.trim()
            );
            error!("{}", error_msg);
            anyhow::bail!("{}", error_msg);
        }

        info!(
            "Container {} started with ID: {}",
            container_name,
            stdout.trim()
        );

        Ok(container_name)
    }
}

impl CommandExecutor for ContainerExecutor {
    fn prepare(&self) -> Result<()> {
        if self.current_container().is_some() {
            return Ok(());
        }

        check_podman_available()?;
        let name = self.start_container()?;
        *self.container.lock().unwrap_or_else(PoisonError::into_inner) = Some(name);
        Ok(())
    }

    fn exec(&self, program: &str, args: &[String], dir: Option<&str>) -> Result<CommandOutput> {
        let container_name = self
            .current_container()
            .ok_or_else(|| anyhow::anyhow!("Container for image {} is not running", self.image))?;

        let working_dir = Self::working_dir(dir);
        debug!(
            "Executing in container {} ({}): {} {:?}",
            container_name, working_dir, program, args
        );

        let mut command = Command::new("podman");
        command.arg("exec").arg("-w").arg(&working_dir);
        for (key, value) in &self.env {
            command.arg("-e").arg(format!("{}={}", key, value));
        }
        command.arg(&container_name).arg(program).args(args);

        let output = command
            .output()
            .context("Failed to execute podman exec command")?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: exit_code_of(output.status),
        };

        if !result.success() {
            debug!(
                "Command failed in container {}: program={} exit_code={}",
                container_name, program, result.exit_code
            );
        }

        Ok(result)
    }

    fn shell(&self, script: &str, dir: Option<&str>) -> Result<CommandOutput> {
        self.exec(&self.shell, &["-c".to_string(), script.to_string()], dir)
    }

    fn cleanup(&self) -> Result<()> {
        let Some(container_name) = self
            .container
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        debug!("Stopping container {}", container_name);

        // Already stopped containers are fine
        let _ = Command::new("podman")
            .arg("stop")
            .arg(&container_name)
            .output();

        let output = Command::new("podman")
            .arg("rm")
            .arg("-f")
            .arg(&container_name)
            .output()
            .context("Failed to execute podman rm")?;

        if output.status.success() {
            debug!("Container {} removed", container_name);
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Failed to remove container {}: {}", container_name, stderr.trim());
        }

        Ok(())
    }
}

impl Drop for ContainerExecutor {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to cleanup container on drop: {}", e);
        }
    }
}
