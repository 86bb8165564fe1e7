//! Stable exit codes for runlog CLI commands.

use crate::core::types::ReturnCode;

/// Command succeeded, or the run finished with a positive return code.
pub const OK: i32 = 0;
/// Invalid arguments, unreadable log or config, or schema violations.
pub const INVALID: i32 = 1;
/// The run was skipped because every declared output was already present.
pub const SKIPPED: i32 = 2;
/// Declared input artifacts were missing, the unit never executed.
pub const INPUT_MISSING: i32 = 3;
/// The unit executed but declared output artifacts were missing afterwards.
pub const OUTPUT_MISSING: i32 = 4;
/// The unit faulted: non-zero exit, callable error, or panic.
pub const FAULT: i32 = 5;

/// Map a run's terminal [`ReturnCode`] onto a process exit code.
///
/// `SkippedUnnecessary` maps to its own code rather than `OK` so scripts can
/// tell "ran" from "nothing to do" apart; `runlog run --ok-on-skip` folds the
/// two together for callers that only check for zero.
pub fn for_return_code(code: ReturnCode) -> i32 {
    match code {
        ReturnCode::Success => OK,
        ReturnCode::SkippedUnnecessary => SKIPPED,
        ReturnCode::InputMissing => INPUT_MISSING,
        ReturnCode::OutputMissing => OUTPUT_MISSING,
        ReturnCode::Fault => FAULT,
        ReturnCode::NotRun => INVALID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_terminal_code_has_a_distinct_exit_code() {
        let codes = [
            for_return_code(ReturnCode::Success),
            for_return_code(ReturnCode::SkippedUnnecessary),
            for_return_code(ReturnCode::InputMissing),
            for_return_code(ReturnCode::OutputMissing),
            for_return_code(ReturnCode::Fault),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(for_return_code(ReturnCode::Success), OK);
    }
}
