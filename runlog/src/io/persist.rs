//! Log persistence: load-modify-rewrite of the on-disk RunRecord collection.
//!
//! The log file holds a pretty-printed JSON array of [`RunRecord`]s. Every
//! flush rewrites the whole array atomically (temp file + rename). Access
//! failures never abort the monitored unit: the persister downgrades them to
//! a warn-once state and retries on the next flush, and pending engine
//! output stays queued until a write succeeds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::io::record::{CommandRecord, RunRecord};
use crate::io::repo::RepoState;

/// How the current [`CommandRecord`] lands in its RunRecord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Start a new command entry.
    Append,
    /// Refresh the entry created by the last `Append`.
    ReplaceLast,
}

/// Run-level state merged into the RunRecord on every flush.
pub struct FlushContext<'a> {
    pub run_id: &'a str,
    pub tracked_repositories: &'a BTreeMap<String, RepoState>,
    pub source_archive: Option<&'a str>,
    pub environment: &'a Value,
    /// Engine output entries not yet persisted; drained only when a write
    /// succeeds.
    pub pending_output: &'a mut Vec<Vec<String>>,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Written,
    /// Written after one or more failed attempts.
    Recovered,
    /// First failure since the last successful write; carries the reason.
    Lost(String),
    /// Consecutive failure, already warned.
    StillLost,
}

/// Writes RunRecords to one log file, tracking access loss across flushes.
#[derive(Debug)]
pub struct LogPersister {
    path: PathBuf,
    access_lost: bool,
}

impl LogPersister {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            access_lost: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access_lost(&self) -> bool {
        self.access_lost
    }

    /// Upsert the active RunRecord and its current command, then rewrite the
    /// file. Failures are reported, never raised.
    pub fn flush(
        &mut self,
        ctx: &mut FlushContext,
        record: &CommandRecord,
        mode: FlushMode,
    ) -> FlushOutcome {
        match self.try_flush(ctx, record, mode) {
            Ok(()) => {
                if self.access_lost {
                    self.access_lost = false;
                    debug!(path = %self.path.display(), "log file access regained");
                    FlushOutcome::Recovered
                } else {
                    FlushOutcome::Written
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                if self.access_lost {
                    debug!(path = %self.path.display(), %reason, "log file still inaccessible");
                    FlushOutcome::StillLost
                } else {
                    self.access_lost = true;
                    warn!(path = %self.path.display(), %reason, "log file access lost");
                    FlushOutcome::Lost(reason)
                }
            }
        }
    }

    fn try_flush(
        &self,
        ctx: &mut FlushContext,
        record: &CommandRecord,
        mode: FlushMode,
    ) -> Result<()> {
        let mut records = if self.path.is_file() {
            load_records(&self.path)?
        } else {
            Vec::new()
        };

        if !records
            .last()
            .is_some_and(|last| last.run_id == ctx.run_id)
        {
            records.push(RunRecord::new(
                ctx.run_id.to_string(),
                ctx.environment.clone(),
            ));
        }
        let run = records
            .last_mut()
            .context("run record collection empty after upsert")?;

        run.tracked_repositories = ctx.tracked_repositories.clone();
        run.source_archive = ctx.source_archive.map(str::to_string);
        run.engine.output.extend(ctx.pending_output.iter().cloned());

        match mode {
            FlushMode::Append => run.commands.push(record.clone()),
            FlushMode::ReplaceLast => {
                if let Some(last) = run.commands.last_mut() {
                    *last = record.clone();
                } else {
                    run.commands.push(record.clone());
                }
            }
        }

        let mut buf = serde_json::to_string_pretty(&records)?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        ctx.pending_output.clear();
        Ok(())
    }
}

/// Load a log file as a list of RunRecords.
pub fn load_records(path: &Path) -> Result<Vec<RunRecord>> {
    debug!(path = %path.display(), "loading run log");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run log {}", path.display()))?;
    let records: Vec<RunRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("parse run log {}", path.display()))?;
    debug!(runs = records.len(), "run log loaded");
    Ok(records)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run log path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run log {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run log {}", path.display()))?;
    Ok(())
}
