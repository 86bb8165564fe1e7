//! Shared test helpers: quiet engine configs and disposable git repos.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::io::config::EngineConfig;

/// Engine config for tests: no stdout echo, fast flush cadence, defaults
/// otherwise.
pub fn quiet_config(log_path: Option<PathBuf>) -> EngineConfig {
    EngineConfig {
        log_path,
        print_messages: false,
        flush_interval_secs: 1,
        ..EngineConfig::default()
    }
}

/// Initialize a git repository with one commit at `root`.
pub fn init_git_repo(root: &Path) {
    git(root, &["init", "--quiet"]);
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "user.name", "test"]);
    fs::write(root.join("README.md"), "hi\n").expect("write seed file");
    git(root, &["add", "README.md"]);
    git(root, &["commit", "--quiet", "-m", "chore: init"]);
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .unwrap_or_else(|err| panic!("spawn git {args:?}: {err}"));
    assert!(status.success(), "git {args:?} failed");
}
