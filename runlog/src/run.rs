//! The run protocol: decide, verify, execute, record.
//!
//! [`run`] and [`try_run`] drive one [`Invocable`] through the same fixed
//! sequence. Declared outputs decide whether execution is necessary at all;
//! declared inputs gate it; the invocation streams into the engine's capture;
//! produced outputs are verified and fingerprinted; and the whole story is
//! flushed to the run log before, during, and after execution so a crash
//! leaves a readable record. Nested runs (a function unit invoking another
//! unit through the same engine) share the parent's capture and never write
//! their own log entry.

use std::panic::Location;

use anyhow::Result;
use chrono::Local;
use tracing::debug;

use crate::core::fault::{MissingInputError, MissingOutputError};
use crate::core::types::{ArgValue, CallSite, ReturnCode};
use crate::engine::{Engine, RunGuard};
use crate::exit_codes;
use crate::invocable::Invocable;
use crate::io::artifact;
use crate::io::driver::{self, ShellRequest};
use crate::io::persist::FlushMode;
use crate::io::record::{CommandRecord, OptionsRecord};

/// Per-run settings that do not belong on the unit itself.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Probe flag executed before the main command, e.g. `--version`. Its
    /// output lands at the top of the captured text. Process units only.
    pub version_probe: Option<String>,
    /// Shell text prepended to the rendered command on its own line, e.g.
    /// environment setup. Process units only.
    pub prelude: Option<String>,
    /// Inputs verified in addition to the unit's declared ones.
    pub extra_inputs: Vec<ArgValue>,
    /// Outputs checked in addition to the unit's declared ones.
    pub extra_outputs: Vec<ArgValue>,
    /// Run without capture, messages, notifications, or a log entry.
    /// Artifact checks still apply and every failure raises, including exit
    /// codes the unit is configured to ignore.
    pub silent: bool,
}

/// Terminal state of one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub code: ReturnCode,
    pub fault: Option<anyhow::Error>,
}

impl RunOutcome {
    /// The code on success, the captured fault otherwise.
    pub fn into_result(self) -> Result<ReturnCode> {
        match self.fault {
            Some(err) => Err(err),
            None => Ok(self.code),
        }
    }
}

/// Run `unit` and apply the engine's fault policy to the outcome.
///
/// Nested and silent runs always propagate their fault so the caller sees
/// it. Top-level faults raise when `raise_on_fault` is set, terminate the
/// process when only `exit_on_fault` is set, and otherwise come back as a
/// plain [`ReturnCode`].
#[track_caller]
pub fn run(engine: &Engine, unit: &Invocable, options: &RunOptions) -> Result<ReturnCode> {
    let call_site = CallSite::from_location(Location::caller());
    let (outcome, nested) = execute(engine, unit, options, call_site);
    if outcome.code.is_ok() {
        return Ok(outcome.code);
    }
    if nested || options.silent || engine.config().raise_on_fault {
        return outcome.into_result();
    }
    if engine.config().exit_on_fault {
        std::process::exit(exit_codes::for_return_code(outcome.code));
    }
    Ok(outcome.code)
}

/// Run `unit` and hand back the outcome without applying fault policy.
#[track_caller]
pub fn try_run(engine: &Engine, unit: &Invocable, options: &RunOptions) -> RunOutcome {
    let call_site = CallSite::from_location(Location::caller());
    execute(engine, unit, options, call_site).0
}

/// Drive one unit through the full protocol.
///
/// Returns the outcome plus whether this run was nested inside another. The
/// nested flag must come from [`Engine::enter_run`], not the caller, so that
/// fault policy cannot be bypassed by lying about nesting.
fn execute(
    engine: &Engine,
    unit: &Invocable,
    options: &RunOptions,
    call_site: CallSite,
) -> (RunOutcome, bool) {
    let guard = engine.enter_run();
    let nested = guard.nested;
    let quiet = options.silent;
    let persist = !quiet && !nested;

    let inputs = merge(unit.expected_inputs(), &options.extra_inputs);
    let outputs = merge(unit.expected_outputs(), &options.extra_outputs);

    // A unit with no declared outputs is always necessary.
    let necessary = outputs.is_empty() || !artifact::missing(&outputs).is_empty();
    if !necessary && (engine.config().short_circuit_unnecessary || quiet) {
        debug!(unit = unit.name(), "all outputs present, run skipped");
        let outcome = RunOutcome {
            code: ReturnCode::SkippedUnnecessary,
            fault: None,
        };
        return (outcome, nested);
    }

    let run_string = compose_run_string(unit, options);
    let mut record = CommandRecord::new(
        unit.name(),
        unit.description(),
        unit.is_function(),
        run_string.clone(),
        OptionsRecord {
            positional: unit.positional_strings(),
            keyed: unit.keyed_strings(),
        },
        call_site,
    );
    record.input.expected = artifact::flatten(&inputs);
    record.output.expected = artifact::flatten(&outputs);
    record.mark_start(Local::now());

    if !quiet {
        engine.log_message(&format!("{} START", unit.name()));
    }
    notify_start(engine, unit.name(), quiet);
    if persist {
        engine.flush_record(&record, FlushMode::Append);
    }

    let mut fault = None;
    let code = if !necessary {
        engine.log_message("Skipping execution. All output files already present.");
        ReturnCode::SkippedUnnecessary
    } else {
        let missing_inputs = artifact::missing(&inputs);
        if missing_inputs.is_empty() {
            record.input.found = artifact::fingerprint(&inputs);
            if persist {
                engine.flush_record(&record, FlushMode::ReplaceLast);
            }
            let attempt = invoke(engine, unit, options, &run_string, &guard, persist, &mut record);
            match attempt {
                Ok(()) => {
                    let missing_outputs = artifact::missing(&outputs);
                    if missing_outputs.is_empty() {
                        record.output.found = artifact::fingerprint(&outputs);
                        ReturnCode::Success
                    } else {
                        if !quiet {
                            engine.log_message(&format!(
                                "Something went wrong! Expected output files are missing: {}",
                                missing_outputs.join(", ")
                            ));
                        }
                        record.output.missing = missing_outputs.clone();
                        fault = Some(anyhow::Error::new(MissingOutputError {
                            missing: missing_outputs,
                        }));
                        ReturnCode::OutputMissing
                    }
                }
                Err(err) => {
                    let code = classify(&err);
                    if !quiet {
                        engine.log_message(&format!("Exception: {err:#}"));
                    }
                    fault = Some(err);
                    code
                }
            }
        } else {
            if !quiet {
                engine.log_message(&format!(
                    "Skipping execution. Input files missing: {}",
                    missing_inputs.join(", ")
                ));
            }
            record.input.missing = missing_inputs.clone();
            fault = Some(anyhow::Error::new(MissingInputError {
                missing: missing_inputs,
            }));
            ReturnCode::InputMissing
        }
    };

    // Nested runs feed the parent's capture; only its owner may finish it.
    if !nested {
        record.text_output = guard.capture.finish();
    }
    record.finalize(code, Local::now());
    if !quiet {
        engine.log_message(&format!("{} END", unit.name()));
        let config = engine.config();
        if !nested && !code.is_ok() && config.exit_on_fault && !config.raise_on_fault {
            engine.log_message(&format!("Exiting due to error: {}", code.meaning()));
        }
    }
    if persist {
        engine.flush_record(&record, FlushMode::ReplaceLast);
    }
    notify_end(engine, unit.name(), code, quiet);

    (RunOutcome { code, fault }, nested)
}

/// Execute the unit itself, routing output into `capture` and flushing the
/// in-progress record on every poll tick.
fn invoke(
    engine: &Engine,
    unit: &Invocable,
    options: &RunOptions,
    run_string: &str,
    guard: &RunGuard,
    persist: bool,
    record: &mut CommandRecord,
) -> Result<()> {
    let quiet = options.silent;
    let interval = engine.config().flush_interval();
    let capture = &guard.capture;
    let mut on_tick = || {
        if persist {
            record.text_output = capture.snapshot();
            engine.flush_record(record, FlushMode::ReplaceLast);
        }
    };

    (|| -> Result<()> {
        if let Some(callable) = unit.callable() {
            let args = unit.call_args();
            let value = if quiet {
                driver::run_callable_silent(callable.as_ref(), &args)?
            } else if guard.nested {
                driver::run_callable_inline(callable.as_ref(), &args, &mut capture.writer())?
            } else {
                driver::run_callable(callable, args, capture, interval, &mut on_tick)?
            };
            engine.set_function_return(Some(value));
            return Ok(());
        }
        if quiet {
            return driver::run_shell_silent(run_string);
        }
        if let Some(probe) = &options.version_probe
            && let Some(program) = unit.program()
        {
            let request = ShellRequest {
                command_line: format!("{program} {probe}"),
                ignore_exit_code: true,
                flush_interval: interval,
            };
            driver::run_shell(&request, capture, &mut on_tick)?;
        }
        let request = ShellRequest {
            command_line: run_string.to_string(),
            ignore_exit_code: unit.ignores_exit_code(),
            flush_interval: interval,
        };
        let status = driver::run_shell(&request, capture, &mut on_tick)?;
        if !status.success() {
            let shown = status
                .code()
                .map_or_else(|| "(signal)".to_string(), |code| code.to_string());
            engine.log_message(&format!("Ignoring non-zero exit status {shown}"));
        }
        Ok(())
    })()
}

fn merge(declared: &[ArgValue], extra: &[ArgValue]) -> Vec<ArgValue> {
    declared.iter().chain(extra).cloned().collect()
}

fn compose_run_string(unit: &Invocable, options: &RunOptions) -> String {
    let rendered = unit.render();
    match &options.prelude {
        Some(prelude) if !unit.is_function() => format!("{prelude}\n{rendered}"),
        _ => rendered,
    }
}

/// Faults raised by nested runs keep their artifact return codes when they
/// surface through the enclosing function unit.
fn classify(err: &anyhow::Error) -> ReturnCode {
    if err.downcast_ref::<MissingOutputError>().is_some() {
        ReturnCode::OutputMissing
    } else if err.downcast_ref::<MissingInputError>().is_some() {
        ReturnCode::InputMissing
    } else {
        ReturnCode::Fault
    }
}

fn notify_start(engine: &Engine, name: &str, quiet: bool) {
    if quiet {
        return;
    }
    let Some(notifier) = engine.notifier() else {
        return;
    };
    if !notifier.level().sends_start() {
        return;
    }
    if let Err(err) = notifier.announce_start(name) {
        engine.log_message(&format!("Failed to deliver notification: {err:#}"));
    }
}

fn notify_end(engine: &Engine, name: &str, code: ReturnCode, quiet: bool) {
    if quiet {
        return;
    }
    let Some(notifier) = engine.notifier() else {
        return;
    };
    if !notifier.level().sends_end(code.is_ok()) {
        return;
    }
    if let Err(err) = notifier.announce_end(name, code.meaning(), engine.log_path()) {
        engine.log_message(&format!("Failed to deliver notification: {err:#}"));
    }
}
