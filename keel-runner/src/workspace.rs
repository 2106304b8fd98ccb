//! Workspace management
//!
//! Every node block runs in a workspace directory that is emptied before its
//! first stage. The directory itself is kept (it may be a mount point or be
//! shared with a `WORKSPACE` set by an outer CI system), only its contents go.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::error::RunError;

/// Directory names never copied by `copy_tree`
const COPY_EXCLUDES: &[&str] = &[".git", "target", ".keel"];

/// Resolves the workspace of a node block
///
/// In order of preference:
/// 1. the block's own workspace (relative paths live under `workspace_root`)
/// 2. the configured `WORKSPACE`
/// 3. `<workspace_root>/<pipeline slug>/<label>`
pub fn resolve_workspace(
    explicit: Option<&str>,
    config: &RunnerConfig,
    pipeline_slug: &str,
    label: &str,
) -> PathBuf {
    let path = match explicit {
        Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
        Some(dir) => config.workspace_root.join(dir),
        None => match &config.workspace {
            Some(workspace) => workspace.clone(),
            None => config
                .workspace_root
                .join(pipeline_slug)
                .join(sanitize_component(label)),
        },
    };

    std::path::absolute(&path).unwrap_or(path)
}

/// Empties `path`, creating it when missing
///
/// Symlinks inside the workspace are removed, never followed. Refuses to
/// clean a workspace that is or contains `source_dir`.
pub fn clean_workspace(path: &Path, source_dir: Option<&Path>) -> Result<(), RunError> {
    let cleanup_error = |source: io::Error| RunError::WorkspaceCleanup {
        path: path.to_path_buf(),
        source,
    };

    if path.parent().is_none() {
        return Err(cleanup_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to clean a filesystem root",
        )));
    }

    if path.exists() && !path.is_dir() {
        return Err(cleanup_error(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "workspace path exists and is not a directory",
        )));
    }

    if let Some(source) = source_dir.filter(|source| contains_path(path, source)) {
        return Err(cleanup_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("workspace contains the source directory {}", source.display()),
        )));
    }

    ensure_dir(path).map_err(cleanup_error)?;

    let mut removed = 0usize;
    for entry in fs::read_dir(path).map_err(cleanup_error)? {
        let entry = entry.map_err(cleanup_error)?;
        let file_type = entry.file_type().map_err(cleanup_error)?;
        if file_type.is_dir() {
            fs::remove_dir_all(entry.path()).map_err(cleanup_error)?;
        } else {
            fs::remove_file(entry.path()).map_err(cleanup_error)?;
        }
        removed += 1;
    }

    info!("Cleaned workspace {} ({} entries removed)", path.display(), removed);
    Ok(())
}

/// Whether `inner` is `outer` or lies beneath it, after resolving symlinks
fn contains_path(outer: &Path, inner: &Path) -> bool {
    match (fs::canonicalize(outer), fs::canonicalize(inner)) {
        (Ok(outer), Ok(inner)) => inner.starts_with(outer),
        _ => false,
    }
}

/// Creates `path` and its parents if they do not exist
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        debug!("Creating directory {}", path.display());
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Copies the contents of `source` into `destination`
///
/// VCS metadata, build output and `destination` itself (when it lives
/// inside `source`) are skipped. Returns the number of files copied.
pub fn copy_tree(source: &Path, destination: &Path) -> io::Result<usize> {
    let source = fs::canonicalize(source)?;
    ensure_dir(destination)?;
    let destination = fs::canonicalize(destination)?;

    if source == destination {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "source and workspace are the same directory",
        ));
    }

    copy_dir(&source, &destination, &destination)
}

fn copy_dir(from: &Path, to: &Path, skip: &Path) -> io::Result<usize> {
    let mut copied = 0;

    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();

        if path == skip || COPY_EXCLUDES.iter().any(|ex| name == *ex) {
            continue;
        }

        let target = to.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            ensure_dir(&target)?;
            copied += copy_dir(&path, &target, skip)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(&path)?;
            copy_symlink(&link, &target)?;
            copied += 1;
        } else {
            fs::copy(&path, &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}

fn sanitize_component(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
