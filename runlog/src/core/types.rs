//! Shared value types: return codes, argument values, call sites.

use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Terminal (and pre-terminal) codes for one execution attempt.
///
/// Wire values and meaning strings are stable; the log file stores both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// Pre-terminal value visible in a still-running record.
    NotRun,
    Success,
    /// All declared outputs were already present; nothing ran.
    SkippedUnnecessary,
    /// The unit ran but declared outputs were missing afterwards.
    OutputMissing,
    /// Declared inputs were missing; the unit never ran.
    InputMissing,
    /// The unit raised a fault or exited non-zero.
    Fault,
}

impl ReturnCode {
    pub fn value(self) -> i32 {
        match self {
            ReturnCode::NotRun => 0,
            ReturnCode::Success => 1,
            ReturnCode::SkippedUnnecessary => 2,
            ReturnCode::OutputMissing => -1,
            ReturnCode::InputMissing => -2,
            ReturnCode::Fault => -3,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(ReturnCode::NotRun),
            1 => Some(ReturnCode::Success),
            2 => Some(ReturnCode::SkippedUnnecessary),
            -1 => Some(ReturnCode::OutputMissing),
            -2 => Some(ReturnCode::InputMissing),
            -3 => Some(ReturnCode::Fault),
            _ => None,
        }
    }

    pub fn meaning(self) -> &'static str {
        match self {
            ReturnCode::NotRun => "not run",
            ReturnCode::Success => "run successful",
            ReturnCode::SkippedUnnecessary => "run not necessary",
            ReturnCode::OutputMissing => "output missing after run",
            ReturnCode::InputMissing => "input missing",
            ReturnCode::Fault => "exception",
        }
    }

    /// Codes above zero mean the run either succeeded or was not needed.
    pub fn is_ok(self) -> bool {
        self.value() > 0
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.meaning())
    }
}

impl Serialize for ReturnCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.value())
    }
}

impl<'de> Deserialize<'de> for ReturnCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        ReturnCode::from_value(value)
            .ok_or_else(|| D::Error::custom(format!("unknown return code {value}")))
    }
}

/// A single argument value: text, number, path, or a nested list.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Text(String),
    Int(i64),
    Float(f64),
    Path(PathBuf),
    List(Vec<ArgValue>),
}

impl ArgValue {
    /// Rendering used in run strings; list elements join with spaces.
    pub fn render(&self) -> String {
        match self {
            ArgValue::Text(text) => text.clone(),
            ArgValue::Int(value) => value.to_string(),
            ArgValue::Float(value) => value.to_string(),
            ArgValue::Path(path) => path.display().to_string(),
            ArgValue::List(items) => items
                .iter()
                .map(ArgValue::render)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Text(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Float(value)
    }
}

impl From<PathBuf> for ArgValue {
    fn from(value: PathBuf) -> Self {
        ArgValue::Path(value)
    }
}

impl From<&Path> for ArgValue {
    fn from(value: &Path) -> Self {
        ArgValue::Path(value.to_path_buf())
    }
}

impl From<Vec<ArgValue>> for ArgValue {
    fn from(value: Vec<ArgValue>) -> Self {
        ArgValue::List(value)
    }
}

/// Source location of a `run()` call, captured via `#[track_caller]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CallSite {
    pub fn from_location(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_wire_values_are_stable() {
        assert_eq!(ReturnCode::NotRun.value(), 0);
        assert_eq!(ReturnCode::Success.value(), 1);
        assert_eq!(ReturnCode::SkippedUnnecessary.value(), 2);
        assert_eq!(ReturnCode::OutputMissing.value(), -1);
        assert_eq!(ReturnCode::InputMissing.value(), -2);
        assert_eq!(ReturnCode::Fault.value(), -3);
    }

    #[test]
    fn return_code_meanings_are_stable() {
        assert_eq!(ReturnCode::Success.meaning(), "run successful");
        assert_eq!(ReturnCode::SkippedUnnecessary.meaning(), "run not necessary");
        assert_eq!(ReturnCode::Fault.meaning(), "exception");
    }

    #[test]
    fn return_code_round_trips_through_json() {
        let encoded = serde_json::to_string(&ReturnCode::InputMissing).expect("encode");
        assert_eq!(encoded, "-2");
        let decoded: ReturnCode = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, ReturnCode::InputMissing);
    }

    #[test]
    fn unknown_return_code_fails_to_decode() {
        assert!(serde_json::from_str::<ReturnCode>("7").is_err());
    }

    #[test]
    fn only_positive_codes_are_ok() {
        assert!(ReturnCode::Success.is_ok());
        assert!(ReturnCode::SkippedUnnecessary.is_ok());
        assert!(!ReturnCode::NotRun.is_ok());
        assert!(!ReturnCode::Fault.is_ok());
    }

    #[test]
    fn arg_value_renders_nested_lists_with_spaces() {
        let value = ArgValue::List(vec![
            ArgValue::from("a.txt"),
            ArgValue::List(vec![ArgValue::from(1_i64), ArgValue::from("b.txt")]),
        ]);
        assert_eq!(value.render(), "a.txt 1 b.txt");
    }

    #[test]
    fn arg_value_renders_paths_and_numbers() {
        assert_eq!(ArgValue::from(PathBuf::from("/tmp/x")).render(), "/tmp/x");
        assert_eq!(ArgValue::from(3_i64).render(), "3");
        assert_eq!(ArgValue::from(0.5_f64).render(), "0.5");
    }

    #[test]
    fn call_site_captures_this_file() {
        let site = CallSite::from_location(Location::caller());
        assert!(site.file.ends_with("types.rs"));
        assert!(site.line > 0);
    }
}
