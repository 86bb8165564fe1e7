//! Typed faults raised by the engine.
//!
//! These flow through `anyhow::Error` and are recovered with `downcast_ref`
//! where the run state machine maps them to return codes. Log-write failures
//! are never raised; the persister downgrades them to warn-once state.

use std::error::Error;
use std::fmt;

/// Process unit name did not resolve on the search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNotFound {
    pub name: String,
}

impl fmt::Display for CommandNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command not found on search path: {}", self.name)
    }
}

impl Error for CommandNotFound {}

/// Argument shape not accepted by the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidArgument {
    pub reason: String,
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid argument: {}", self.reason)
    }
}

impl Error for InvalidArgument {}

/// Declared inputs absent before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInputError {
    pub missing: Vec<String>,
}

impl fmt::Display for MissingInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input files missing: {}", self.missing.join(", "))
    }
}

impl Error for MissingInputError {}

/// Declared outputs absent after execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingOutputError {
    pub missing: Vec<String>,
}

impl fmt::Display for MissingOutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output files missing after run: {}", self.missing.join(", "))
    }
}

impl Error for MissingOutputError {}

/// Process exited with a non-zero code that was not ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonZeroExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl fmt::Display for NonZeroExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "process exited with code {code}"),
            None => write!(f, "process terminated by signal"),
        }
    }
}

impl Error for NonZeroExit {}

/// Marks a fault raised inside a function unit; the original fault stays in
/// the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallableFault;

impl fmt::Display for CallableFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function unit raised a fault")
    }
}

impl Error for CallableFault {}
