//! Engine context: the shared state one provenance session runs under.
//!
//! The engine owns the configuration, the persister, the pending
//! engine-output buffer, and the reentrancy state. It is cheap to clone and
//! safe to share, so function units can call back into it for nested runs.
//! There is no hidden global state; everything a run needs travels with the
//! engine handle.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::invocable::{CallArgs, Invocable};
use crate::io::capture::CaptureStream;
use crate::io::config::EngineConfig;
use crate::io::environment;
use crate::io::notify::Notifier;
use crate::io::persist::{FlushContext, FlushMode, FlushOutcome, LogPersister, load_records};
use crate::io::record::{CommandRecord, RunRecord, format_timestamp};
use crate::io::repo::{self, RepoState};

/// Shared execution context. All handles cloned from one engine observe the
/// same log, reentrancy state, and pending output.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    /// Host snapshot, collected once and embedded into every RunRecord.
    environment: Value,
    state: Mutex<EngineState>,
}

struct EngineState {
    /// Lazily generated on the first persisted flush.
    run_id: Option<String>,
    persister: Option<LogPersister>,
    /// Engine output entries waiting for the next successful flush.
    pending_output: Vec<Vec<String>>,
    tracked_repositories: BTreeMap<String, RepoState>,
    source_archive: Option<String>,
    notifier: Option<Notifier>,
    /// Present while a top-level run executes; later entrants are nested.
    active: Option<ActiveRun>,
    function_return: Option<Value>,
}

struct ActiveRun {
    capture: CaptureStream,
}

/// Scope marker for one `run` invocation. Dropping a top-level guard frees
/// the engine for the next run.
pub(crate) struct RunGuard {
    engine: Engine,
    pub(crate) nested: bool,
    pub(crate) capture: CaptureStream,
    release: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.release {
            self.engine.state().active = None;
        }
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let notifier = Notifier::from_config(&config.notify)?;
        let persister = config.log_path.clone().map(LogPersister::new);
        debug!(log_path = ?config.log_path, "engine created");
        Ok(Self {
            inner: Arc::new(EngineInner {
                environment: environment::snapshot(),
                state: Mutex::new(EngineState {
                    run_id: None,
                    persister,
                    pending_output: Vec::new(),
                    tracked_repositories: BTreeMap::new(),
                    source_archive: None,
                    notifier,
                    active: None,
                    function_return: None,
                }),
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.inner.config.log_path.as_deref()
    }

    /// Delete an existing log file so the next run starts a fresh history.
    pub fn reset_log(&self) -> Result<()> {
        if let Some(path) = self.log_path()
            && path.is_file()
        {
            fs::remove_file(path)
                .with_context(|| format!("remove run log {}", path.display()))?;
        }
        Ok(())
    }

    /// Parsed contents of the configured log file.
    pub fn load_log(&self) -> Result<Vec<RunRecord>> {
        let path = self
            .log_path()
            .context("engine has no log path configured")?;
        load_records(path)
    }

    /// Wrap an external program, applying the configured installer rewrites.
    pub fn process_unit(&self, program: &str) -> Result<Invocable> {
        Invocable::process_with(program, &self.inner.config.installer)
    }

    /// Wrap an in-process callable under the given display name.
    pub fn function_unit<F>(&self, name: &str, callable: F) -> Invocable
    where
        F: Fn(&CallArgs, &mut dyn Write) -> Result<Value> + Send + Sync + 'static,
    {
        Invocable::function(name, callable)
    }

    /// Append a timestamped line to the engine output of the active
    /// RunRecord; it is persisted with the next flush.
    pub fn log_message(&self, message: &str) {
        let timestamp = format_timestamp(Local::now());
        if self.inner.config.print_messages {
            println!("{timestamp} >> {message}");
        }
        push_entry(&mut self.state().pending_output, &timestamp, message);
    }

    /// Register a git work tree whose state is recorded with every flush.
    pub fn track_repository(&self, path: &Path) -> Result<()> {
        repo::ensure_trackable(path)?;
        let state = repo::inspect(path);
        self.state()
            .tracked_repositories
            .insert(path.display().to_string(), state);
        Ok(())
    }

    /// Record a path to an archive of the sources that produced this run.
    pub fn set_source_archive(&self, archive: impl Into<String>) {
        self.state().source_archive = Some(archive.into());
    }

    pub fn set_notifier(&self, notifier: Notifier) {
        self.state().notifier = Some(notifier);
    }

    /// Deliver an explicit message through the notifier, if one is set.
    /// Delivery failure folds into engine output instead of raising.
    pub fn send_message(&self, text: &str) {
        let Some(notifier) = self.notifier() else {
            return;
        };
        if let Err(err) = notifier.send_text(text) {
            self.log_message(&format!("Failed to deliver notification: {err:#}"));
        }
    }

    /// Return value of the most recently completed function unit.
    pub fn function_return(&self) -> Option<Value> {
        self.state().function_return.clone()
    }

    pub(crate) fn notifier(&self) -> Option<Notifier> {
        self.state().notifier.clone()
    }

    pub(crate) fn set_function_return(&self, value: Option<Value>) {
        self.state().function_return = value;
    }

    /// Mark a run as active. The first entrant becomes the top-level run and
    /// gets a fresh capture stream; any entrant while one is active is
    /// nested and shares the parent's stream.
    pub(crate) fn enter_run(&self) -> RunGuard {
        let mut state = self.state();
        state.function_return = None;
        if let Some(active) = &state.active {
            debug!("run entered while another is active, treating as nested");
            return RunGuard {
                engine: self.clone(),
                nested: true,
                capture: active.capture.clone(),
                release: false,
            };
        }
        let capture = CaptureStream::new(self.inner.config.capture_limit_bytes);
        state.active = Some(ActiveRun {
            capture: capture.clone(),
        });
        RunGuard {
            engine: self.clone(),
            nested: false,
            capture,
            release: true,
        }
    }

    /// Persist the current command record. Failures are folded into pending
    /// engine output, never raised.
    pub(crate) fn flush_record(&self, record: &CommandRecord, mode: FlushMode) {
        let mut state = self.state();
        let state = &mut *state;
        let Some(persister) = state.persister.as_mut() else {
            return;
        };
        let run_id = state
            .run_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let mut ctx = FlushContext {
            run_id: &run_id,
            tracked_repositories: &state.tracked_repositories,
            source_archive: state.source_archive.as_deref(),
            environment: &self.inner.environment,
            pending_output: &mut state.pending_output,
        };
        match persister.flush(&mut ctx, record, mode) {
            FlushOutcome::Written | FlushOutcome::StillLost => {}
            FlushOutcome::Recovered => {
                let message =
                    format!("Logfile access regained: {}", persister.path().display());
                queue_entry(&mut state.pending_output, &message);
            }
            FlushOutcome::Lost(reason) => {
                let message = format!(
                    "Error accessing logfile: {}\nException: {reason}\nProceeding, trying to recover it with the next write.",
                    persister.path().display()
                );
                queue_entry(&mut state.pending_output, &message);
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn queue_entry(pending: &mut Vec<Vec<String>>, message: &str) {
    let timestamp = format_timestamp(Local::now());
    push_entry(pending, &timestamp, message);
}

fn push_entry(pending: &mut Vec<Vec<String>>, timestamp: &str, message: &str) {
    let mut entry = vec![timestamp.to_string()];
    entry.extend(message.lines().map(str::to_string));
    pending.push(entry);
}
