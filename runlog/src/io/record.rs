//! On-disk provenance record types and their lifecycle helpers.
//!
//! A [`RunRecord`] is one caller-visible session; it accumulates one
//! [`CommandRecord`] per top-level execution attempt. Records are created at
//! run start with [`ReturnCode::NotRun`] and finalized exactly once.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{CallSite, ReturnCode};
use crate::io::repo::RepoState;

/// Declared, found, and missing artifacts for one side of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Paths the caller declared, flattened.
    pub expected: Vec<String>,
    /// `(path, fingerprint)` pairs for artifacts observed present.
    pub found: Vec<(String, String)>,
    /// Declared paths that were absent when checked.
    pub missing: Vec<String>,
}

/// Wall-clock bookkeeping for one execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRecord {
    pub start: Option<String>,
    pub end: Option<String>,
    /// `H:MM:SS`.
    pub duration: Option<String>,
    /// Local offset from UTC in seconds at run start.
    pub utc_offset: Option<i32>,
}

/// Rendered argument lists as they appeared at run time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsRecord {
    pub positional: Vec<String>,
    pub keyed: Vec<(String, String)>,
}

/// One execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub name: String,
    pub description: Option<String>,
    pub is_function: bool,
    pub run_string: String,
    pub options: OptionsRecord,
    pub input: ArtifactRecord,
    pub output: ArtifactRecord,
    pub time: TimeRecord,
    pub text_output: Vec<String>,
    pub return_code: ReturnCode,
    pub return_code_meaning: String,
    pub call_stack: Vec<CallSite>,
    #[serde(skip)]
    started_at: Option<DateTime<Local>>,
}

impl CommandRecord {
    pub fn new(
        name: &str,
        description: Option<&str>,
        is_function: bool,
        run_string: String,
        options: OptionsRecord,
        call_site: CallSite,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.map(str::to_string),
            is_function,
            run_string,
            options,
            input: ArtifactRecord::default(),
            output: ArtifactRecord::default(),
            time: TimeRecord::default(),
            text_output: Vec::new(),
            return_code: ReturnCode::NotRun,
            return_code_meaning: ReturnCode::NotRun.meaning().to_string(),
            call_stack: vec![call_site],
            started_at: None,
        }
    }

    /// Stamp the start of execution.
    pub fn mark_start(&mut self, now: DateTime<Local>) {
        self.time.start = Some(format_timestamp(now));
        self.time.utc_offset = Some(now.offset().local_minus_utc());
        self.started_at = Some(now);
    }

    /// Write the terminal code; the record must not change afterwards.
    pub fn finalize(&mut self, code: ReturnCode, now: DateTime<Local>) {
        self.time.end = Some(format_timestamp(now));
        if let Some(started_at) = self.started_at {
            self.time.duration = Some(format_duration(now - started_at));
        }
        self.return_code = code;
        self.return_code_meaning = code.meaning().to_string();
    }
}

/// `%Y-%m-%d %H:%M:%S`, the format used throughout the log.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `H:MM:SS` with unbounded hours.
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Engine block inside a RunRecord: version plus timestamped message lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub version: String,
    /// Each entry is `[timestamp, line, ...]`.
    pub output: Vec<Vec<String>>,
}

impl EngineInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            output: Vec::new(),
        }
    }
}

/// One top-level provenance session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub tracked_repositories: BTreeMap<String, RepoState>,
    pub source_archive: Option<String>,
    pub engine: EngineInfo,
    pub commands: Vec<CommandRecord>,
    pub environment: Value,
}

impl RunRecord {
    pub fn new(run_id: String, environment: Value) -> Self {
        Self {
            run_id,
            tracked_repositories: BTreeMap::new(),
            source_archive: None,
            engine: EngineInfo::current(),
            commands: Vec::new(),
            environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, h, m, s).single().expect("timestamp")
    }

    fn record() -> CommandRecord {
        CommandRecord::new(
            "unit",
            None,
            false,
            "unit --flag".to_string(),
            OptionsRecord::default(),
            CallSite {
                file: "caller.rs".to_string(),
                line: 1,
                column: 1,
            },
        )
    }

    #[test]
    fn new_record_starts_not_run() {
        let record = record();
        assert_eq!(record.return_code, ReturnCode::NotRun);
        assert_eq!(record.return_code_meaning, "not run");
        assert!(record.time.start.is_none());
    }

    #[test]
    fn finalize_stamps_end_duration_and_meaning() {
        let mut record = record();
        record.mark_start(local(12, 0, 0));
        record.finalize(ReturnCode::Success, local(13, 2, 3));
        assert_eq!(record.time.duration.as_deref(), Some("1:02:03"));
        assert_eq!(record.return_code, ReturnCode::Success);
        assert_eq!(record.return_code_meaning, "run successful");
        assert!(record.time.end.is_some());
        assert!(record.time.utc_offset.is_some());
    }

    #[test]
    fn duration_formats_with_zero_padding() {
        assert_eq!(format_duration(TimeDelta::seconds(5)), "0:00:05");
        assert_eq!(format_duration(TimeDelta::seconds(3723)), "1:02:03");
        assert_eq!(format_duration(TimeDelta::seconds(-1)), "0:00:00");
    }

    #[test]
    fn timestamp_format_is_stable() {
        assert_eq!(format_timestamp(local(9, 5, 7)), "2024-05-01 09:05:07");
    }

    #[test]
    fn run_record_round_trips_through_json() {
        let mut run = RunRecord::new("id-1".to_string(), serde_json::json!({"os": "linux"}));
        run.commands.push(record());
        let encoded = serde_json::to_string_pretty(&run).expect("encode");
        let decoded: RunRecord = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.run_id, "id-1");
        assert_eq!(decoded.commands.len(), 1);
        assert_eq!(decoded.commands[0].name, "unit");
        assert_eq!(decoded.engine.version, env!("CARGO_PKG_VERSION"));
    }
}
