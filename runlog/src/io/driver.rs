//! Drives one Invocable to completion while draining its output.
//!
//! Each invocation moves `PENDING -> RUNNING -> {COMPLETED, FAULTED}`. The
//! monitored unit runs on its own thread or process; the caller thread polls
//! on the flush cadence and fires `on_tick` so the persister can snapshot
//! mid-run. Silent variants skip the capture stream entirely and raise on
//! any failure.

use std::any::Any;
use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::core::fault::{CallableFault, NonZeroExit};
use crate::invocable::{CallArgs, CallableFn};
use crate::io::capture::CaptureStream;

const READ_CHUNK_BYTES: usize = 8192;

/// Lifecycle of one driven invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Pending,
    Running,
    Completed,
    Faulted,
}

/// One shell execution request.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    pub command_line: String,
    pub ignore_exit_code: bool,
    pub flush_interval: Duration,
}

fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

/// Run `command_line` through the shell, merging both pipes into `capture`.
///
/// `on_tick` fires roughly every `flush_interval` while the child is alive.
/// Returns the exit status; a non-zero status is a [`NonZeroExit`] fault
/// unless the request ignores exit codes.
pub fn run_shell(
    request: &ShellRequest,
    capture: &CaptureStream,
    on_tick: &mut dyn FnMut(),
) -> Result<ExitStatus> {
    let mut state = DriverState::Pending;
    debug!(?state, command = %request.command_line, "shell unit queued");

    let mut child = shell_command(&request.command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn shell for `{}`", request.command_line))?;
    state = DriverState::Running;
    debug!(?state, pid = child.id(), "shell unit running");

    let stdout_handle = child.stdout.take().map(|pipe| {
        let stream = capture.clone();
        thread::spawn(move || drain(pipe, &stream))
    });
    let stderr_handle = child.stderr.take().map(|pipe| {
        let stream = capture.clone();
        thread::spawn(move || drain(pipe, &stream))
    });

    let status = loop {
        match child
            .wait_timeout(request.flush_interval)
            .context("wait for shell unit")?
        {
            Some(status) => break status,
            None => on_tick(),
        }
    };

    join_drain(stdout_handle);
    join_drain(stderr_handle);

    state = if status.success() || request.ignore_exit_code {
        DriverState::Completed
    } else {
        DriverState::Faulted
    };
    debug!(?state, code = ?status.code(), "shell unit finished");

    if state == DriverState::Faulted {
        return Err(anyhow::Error::new(NonZeroExit {
            code: status.code(),
        }));
    }
    Ok(status)
}

/// Wait for `command_line` with all output discarded. Any non-zero exit
/// raises, regardless of ignore settings.
pub fn run_shell_silent(command_line: &str) -> Result<()> {
    let status = shell_command(command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("spawn shell for `{}`", command_line))?;
    if !status.success() {
        return Err(anyhow::Error::new(NonZeroExit {
            code: status.code(),
        }));
    }
    Ok(())
}

/// Run the callable on a worker thread, polling for completion on the flush
/// cadence. Error returns and panics both surface as faults marked
/// [`CallableFault`].
pub fn run_callable(
    callable: Arc<CallableFn>,
    args: CallArgs,
    capture: &CaptureStream,
    flush_interval: Duration,
    on_tick: &mut dyn FnMut(),
) -> Result<Value> {
    let mut state = DriverState::Pending;
    debug!(?state, "function unit queued");

    let (tx, rx) = mpsc::channel();
    let mut writer = capture.writer();
    let worker = thread::Builder::new()
        .name("runlog-unit".to_string())
        .spawn(move || {
            let result = callable(&args, &mut writer);
            let _ = tx.send(result);
        })
        .context("spawn function unit thread")?;
    state = DriverState::Running;
    debug!(?state, "function unit running");

    let received = loop {
        match rx.recv_timeout(flush_interval) {
            Ok(result) => break Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => on_tick(),
            Err(mpsc::RecvTimeoutError::Disconnected) => break None,
        }
    };
    let join = worker.join();

    let result = match (received, join) {
        (Some(result), _) => result,
        (None, Err(payload)) => Err(anyhow!(
            "function unit panicked: {}",
            panic_message(payload.as_ref())
        )),
        (None, Ok(())) => Err(anyhow!("function unit ended without reporting a result")),
    };

    state = if result.is_ok() {
        DriverState::Completed
    } else {
        DriverState::Faulted
    };
    debug!(?state, "function unit finished");

    result.map_err(|err| err.context(CallableFault))
}

/// Run the callable synchronously on the caller's thread. Nested runs use
/// this so their output interleaves with the parent's capture in order.
pub fn run_callable_inline(
    callable: &CallableFn,
    args: &CallArgs,
    out: &mut dyn Write,
) -> Result<Value> {
    callable(args, out).map_err(|err| err.context(CallableFault))
}

/// Run the callable synchronously with discarded output.
pub fn run_callable_silent(callable: &CallableFn, args: &CallArgs) -> Result<Value> {
    let mut sink = io::sink();
    run_callable_inline(callable, args, &mut sink)
}

fn drain(mut pipe: impl Read, stream: &CaptureStream) {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => stream.push_bytes(&chunk[..n]),
            Err(_) => break,
        }
    }
}

fn join_drain(handle: Option<thread::JoinHandle<()>>) {
    if let Some(handle) = handle
        && handle.join().is_err()
    {
        debug!("output drain thread panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
