//! Log redaction: strip identifying text from a finished run log.
//!
//! Redaction is a standalone pass over the persisted JSON, not a logged
//! operation. Literal strings are removed from the raw text first, with the
//! user's home path always among them, then regex patterns, and finally the
//! host-identity fields are dropped from each record's environment block.
//! The public copy lands next to the original with a `_public` suffix unless
//! an explicit target is given; the original is never modified.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde_json::Value;

use crate::io::persist::write_atomic;

/// Identity fields dropped from `environment.platform` in every record.
const PLATFORM_IDENTITY_FIELDS: [&str; 2] = ["node", "ip"];

/// What to remove beyond the built-in home path and identity fields.
#[derive(Debug, Clone, Default)]
pub struct RedactOptions {
    /// Target file; next to the original with a `_public` suffix when unset.
    pub out: Option<PathBuf>,
    /// Literal strings removed from the raw log text.
    pub strip: Vec<String>,
    /// Regex patterns removed from the raw log text.
    pub patterns: Vec<String>,
}

/// Redact `log` and return the path the public copy was written to.
///
/// Literal and pattern removal work on the raw text, so a removal that
/// overlaps JSON structure (quotes, braces) is reported as an error rather
/// than silently producing an unreadable file.
pub fn redact_log(log: &Path, options: &RedactOptions) -> Result<PathBuf> {
    let mut content =
        fs::read_to_string(log).with_context(|| format!("read run log {}", log.display()))?;

    let mut literals = options.strip.clone();
    if let Ok(home) = std::env::var("HOME")
        && !home.is_empty()
    {
        literals.push(home);
    }
    for literal in &literals {
        if literal.is_empty() {
            continue;
        }
        content = content.replace(literal.as_str(), "");
    }
    for pattern in &options.patterns {
        let regex = Regex::new(pattern)
            .with_context(|| format!("invalid redaction pattern `{pattern}`"))?;
        content = regex.replace_all(&content, "").into_owned();
    }

    let mut records: Value = serde_json::from_str(&content).with_context(|| {
        format!(
            "run log {} no longer parses after text redaction",
            log.display()
        )
    })?;
    let Some(entries) = records.as_array_mut() else {
        bail!("run log {} is not a JSON array of records", log.display());
    };
    for entry in entries {
        if let Some(platform) = entry
            .pointer_mut("/environment/platform")
            .and_then(Value::as_object_mut)
        {
            for field in PLATFORM_IDENTITY_FIELDS {
                platform.remove(field);
            }
        }
    }

    let target = options.out.clone().unwrap_or_else(|| default_target(log));
    let mut body = serde_json::to_string_pretty(&records).context("serialize redacted log")?;
    body.push('\n');
    write_atomic(&target, &body)?;
    Ok(target)
}

fn default_target(log: &Path) -> PathBuf {
    let stem = log
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("runlog");
    let name = match log.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}_public.{ext}"),
        None => format!("{stem}_public"),
    };
    log.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::engine::Engine;
    use crate::invocable::Invocable;
    use crate::run::{RunOptions, run};
    use crate::test_support::quiet_config;

    fn seeded_log(temp: &TempDir) -> PathBuf {
        let log = temp.path().join("runlog.json");
        let engine = Engine::new(quiet_config(Some(log.clone()))).expect("engine");
        let artifact = temp.path().join("artifact.txt");
        fs::write(&artifact, "payload").expect("write artifact");
        let unit = Invocable::process("true")
            .expect("process")
            .input(artifact.as_path())
            .expect("input");
        run(&engine, &unit, &RunOptions::default()).expect("run");
        log
    }

    #[test]
    fn strips_literals_patterns_and_identity_fields() {
        let temp = TempDir::new().expect("tempdir");
        let log = seeded_log(&temp);
        let temp_str = temp.path().display().to_string();

        let options = RedactOptions {
            out: None,
            strip: vec![temp_str.clone()],
            patterns: vec!["[0-9a-f]{64}".to_string()],
        };
        let target = redact_log(&log, &options).expect("redact");
        assert_eq!(target, temp.path().join("runlog_public.json"));

        let public = fs::read_to_string(&target).expect("read public copy");
        assert!(!public.contains(&temp_str));
        let records: Value = serde_json::from_str(&public).expect("parse public copy");
        let platform = records
            .pointer("/0/environment/platform")
            .and_then(Value::as_object)
            .expect("platform block");
        assert!(!platform.contains_key("node"));
        assert!(!platform.contains_key("ip"));
        let fingerprint = records
            .pointer("/0/commands/0/input/found/0/1")
            .and_then(Value::as_str)
            .expect("fingerprint cell");
        assert_eq!(fingerprint, "", "hex digests match the pattern");

        // The original is untouched.
        let original = fs::read_to_string(&log).expect("read original");
        assert!(original.contains(&temp_str));
        let records: Value = serde_json::from_str(&original).expect("parse original");
        let platform = records
            .pointer("/0/environment/platform")
            .and_then(Value::as_object)
            .expect("platform block");
        assert!(platform.contains_key("node"));
    }

    #[test]
    fn explicit_target_is_honored() {
        let temp = TempDir::new().expect("tempdir");
        let log = seeded_log(&temp);
        let out = temp.path().join("shared.json");

        let options = RedactOptions {
            out: Some(out.clone()),
            ..RedactOptions::default()
        };
        let target = redact_log(&log, &options).expect("redact");

        assert_eq!(target, out);
        assert!(out.is_file());
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let log = seeded_log(&temp);

        let options = RedactOptions {
            patterns: vec!["[unclosed".to_string()],
            ..RedactOptions::default()
        };
        let err = redact_log(&log, &options).expect_err("bad pattern");

        assert!(format!("{err:#}").contains("invalid redaction pattern"));
    }

    #[test]
    fn strips_that_break_the_json_are_reported() {
        let temp = TempDir::new().expect("tempdir");
        let log = seeded_log(&temp);

        let options = RedactOptions {
            strip: vec!["\"".to_string()],
            ..RedactOptions::default()
        };
        let err = redact_log(&log, &options).expect_err("broken json");

        assert!(format!("{err:#}").contains("no longer parses"));
    }
}
