//! Engine configuration, loadable from TOML or built in code.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::decode::DEFAULT_CAPTURE_LIMIT_BYTES;

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Provenance log destination. `None` disables persistence entirely.
    pub log_path: Option<PathBuf>,

    /// Echo engine messages to stdout as they are logged.
    pub print_messages: bool,

    /// Re-raise faults to the caller (takes precedence over `exit_on_fault`).
    pub raise_on_fault: bool,

    /// Terminate the process on a fault when `raise_on_fault` is off.
    pub exit_on_fault: bool,

    /// Return immediately, without touching the log, when every expected
    /// output is already present.
    pub short_circuit_unnecessary: bool,

    /// Seconds between incremental log flushes while a unit is running.
    pub flush_interval_secs: u64,

    /// Truncate captured unit output beyond this many bytes.
    pub capture_limit_bytes: usize,

    pub installer: InstallerConfig,

    pub notify: NotifyConfig,
}

/// Rewrites applied to process units on hosts where tools are reachable only
/// through wrapper scripts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallerConfig {
    pub enabled: bool,

    /// Suffix appended to the program name before search-path resolution.
    pub suffix: String,

    /// Literal `(from, to)` substitutions applied to the rendered run
    /// string.
    pub replacements: Vec<(String, String)>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            suffix: ".sh".to_string(),
            replacements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    /// Command to pipe notification text into (e.g. `["notify-send"]`).
    /// Empty disables the sink.
    pub command: Vec<String>,

    pub level: NotifyLevel,

    /// Prefix prepended to every outgoing message.
    pub caption: Option<String>,

    /// Optional minijinja template over `{event, name, meaning}` replacing
    /// the default message text.
    pub template: Option<String>,
}

/// Which run events produce automatic notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyLevel {
    /// Only explicitly sent messages.
    Manual,
    /// End message only for runs that did not succeed.
    ErrorsOnly,
    /// End message for every run.
    EndOnly,
    /// Start and end messages for every run.
    StartAndEnd,
}

impl NotifyLevel {
    pub fn sends_start(self) -> bool {
        self == NotifyLevel::StartAndEnd
    }

    pub fn sends_end(self, ok: bool) -> bool {
        match self {
            NotifyLevel::Manual => false,
            NotifyLevel::ErrorsOnly => !ok,
            NotifyLevel::EndOnly | NotifyLevel::StartAndEnd => true,
        }
    }
}

impl Default for NotifyLevel {
    fn default() -> Self {
        NotifyLevel::StartAndEnd
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            level: NotifyLevel::default(),
            caption: None,
            template: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            print_messages: true,
            raise_on_fault: true,
            exit_on_fault: false,
            short_circuit_unnecessary: true,
            flush_interval_secs: 5,
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT_BYTES,
            installer: InstallerConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_secs == 0 {
            return Err(anyhow!("flush_interval_secs must be > 0"));
        }
        if self.capture_limit_bytes == 0 {
            return Err(anyhow!("capture_limit_bytes must be > 0"));
        }
        if self.installer.enabled && self.installer.suffix.trim().is_empty() {
            return Err(anyhow!("installer.suffix must not be empty when enabled"));
        }
        if self
            .installer
            .replacements
            .iter()
            .any(|(from, _)| from.is_empty())
        {
            return Err(anyhow!("installer.replacements sources must not be empty"));
        }
        if let Some(first) = self.notify.command.first()
            && first.trim().is_empty()
        {
            return Err(anyhow!("notify.command must start with a program name"));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
