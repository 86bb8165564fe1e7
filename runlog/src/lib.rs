//! Execution and provenance engine for external commands and in-process
//! callables.
//!
//! This crate wraps each unit of work in a run protocol: decide whether the
//! run is needed at all, verify declared input artifacts, capture everything
//! the unit prints, verify declared output artifacts, and persist a
//! structured JSON record of the attempt. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (return codes, line decoding,
//!   fault types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (artifact checks, process and
//!   callable drivers, log persistence, git inspection, notification).
//!
//! Orchestration modules ([`engine`], [`invocable`], [`run`], [`redact`])
//! coordinate core logic with I/O to implement the run protocol and the CLI
//! commands.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod invocable;
pub mod io;
pub mod logging;
pub mod redact;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
