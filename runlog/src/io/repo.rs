//! Repository tracker: records the observed state of git work trees.
//!
//! Provenance needs the code state alongside the command state, so tracked
//! repositories are re-inspected before every flush. Inspection is
//! best-effort: failures fold into the stored state instead of raising.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Observed state of one tracked work tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoState {
    /// HEAD commit hash, when resolvable.
    pub hash: Option<String>,
    /// True when tracked files have staged or unstaged changes.
    pub dirty: bool,
    pub dirty_files: Vec<String>,
    /// Inspection failure, folded in instead of raised.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exception: Option<String>,
}

/// Check that `path` can be tracked: a directory inside a git work tree.
pub fn ensure_trackable(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(anyhow!("\"{}\" is not a directory", path.display()));
    }
    let git = Git::new(path);
    if !git.in_work_tree()? {
        return Err(anyhow!(
            "\"{}\" is not inside a git work tree",
            path.display()
        ));
    }
    Ok(())
}

/// Inspect the work tree at `path`. Never fails; inspection errors land in
/// [`RepoState::exception`].
pub fn inspect(path: &Path) -> RepoState {
    match try_inspect(path) {
        Ok(state) => state,
        Err(err) => RepoState {
            hash: None,
            dirty: false,
            dirty_files: Vec::new(),
            exception: Some(format!("{err:#}")),
        },
    }
}

fn try_inspect(path: &Path) -> Result<RepoState> {
    let git = Git::new(path);
    let hash = git.head_sha()?;
    let dirty_files = git.dirty_files()?;
    debug!(path = %path.display(), hash = %hash, dirty = !dirty_files.is_empty(), "repository inspected");
    Ok(RepoState {
        hash: Some(hash),
        dirty: !dirty_files.is_empty(),
        dirty_files,
        exception: None,
    })
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
struct Git {
    workdir: PathBuf,
}

impl Git {
    fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Changed paths for tracked files, staged or unstaged. Untracked files
    /// do not count as dirt.
    fn dirty_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["status", "--porcelain=v1"])?;
        Ok(parse_dirty_paths(&out))
    }

    fn in_work_tree(&self) -> Result<bool> {
        let output = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        if !output.status.success() {
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_dirty_paths(porcelain: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in porcelain.lines() {
        if line.len() < 4 || line.starts_with("??") {
            continue;
        }
        let mut path = line[3..].trim().to_string();
        if let Some((_, new)) = path.split_once("->") {
            path = new.trim().to_string();
        }
        paths.push(path);
    }
    paths
}
