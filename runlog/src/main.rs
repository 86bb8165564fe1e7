//! Artifact-aware execution wrapper with provenance logging.
//!
//! Wraps one external command per invocation: declared outputs decide
//! whether it needs to run at all, declared inputs gate execution, and the
//! attempt (captured output, artifact fingerprints, timing, return code)
//! lands in a JSON run log. Sibling commands inspect, validate, and redact
//! existing logs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use jsonschema::Draft;
use serde_json::Value;

use runlog::core::types::ArgValue;
use runlog::engine::Engine;
use runlog::exit_codes;
use runlog::io::config::{EngineConfig, load_config};
use runlog::io::persist::load_records;
use runlog::io::record::RunRecord;
use runlog::logging;
use runlog::redact::{RedactOptions, redact_log};
use runlog::run::{RunOptions, try_run};

const V1_SCHEMA: &str = include_str!("../../schemas/run_log/v1.schema.json");
const DEFAULT_LOG: &str = "runlog.json";

#[derive(Parser)]
#[command(
    name = "runlog",
    version,
    about = "Run external commands with artifact-aware provenance logging"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command with declared inputs/outputs and log the attempt.
    Run(RunArgs),
    /// Summarize the records in a run log.
    Show(LogArgs),
    /// Check a run log against the v1 schema.
    Validate(LogArgs),
    /// Write a public copy of a run log with identifying text removed.
    Redact(RedactArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Run log file; `runlog.json` unless the config names one.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Do not persist a run log.
    #[arg(long, conflicts_with = "log")]
    no_log: bool,
    /// Delete an existing log before running.
    #[arg(long)]
    reset_log: bool,
    /// Engine configuration TOML; flags override what it sets.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Record a description alongside the command.
    #[arg(long)]
    description: Option<String>,
    /// Declared input artifact, repeatable.
    #[arg(long = "input", value_name = "PATH")]
    inputs: Vec<PathBuf>,
    /// Declared output artifact, repeatable.
    #[arg(long = "output", value_name = "PATH")]
    outputs: Vec<PathBuf>,
    /// Repository whose state should be recorded, repeatable.
    #[arg(long = "track", value_name = "PATH")]
    tracked: Vec<PathBuf>,
    /// Treat a non-zero exit code as success.
    #[arg(long)]
    ignore_exit_code: bool,
    /// Shell text to run before the command, in the same record.
    #[arg(long, value_name = "SHELL")]
    prelude: Option<String>,
    /// Probe flag (e.g. --version) run first so tool identity is captured.
    #[arg(long, value_name = "FLAG")]
    version_probe: Option<String>,
    /// Run without capture, messages, or a log entry.
    #[arg(long)]
    silent: bool,
    /// Exit 0 instead of 2 when the run was unnecessary.
    #[arg(long)]
    ok_on_skip: bool,
    /// The command to run: program first, then its arguments.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(Args)]
struct LogArgs {
    /// Run log file.
    #[arg(long, default_value = DEFAULT_LOG)]
    log: PathBuf,
}

#[derive(Args)]
struct RedactArgs {
    /// Run log file.
    #[arg(long, default_value = DEFAULT_LOG)]
    log: PathBuf,
    /// Target file; `<log>_public.json` next to the original when unset.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Literal string to remove, repeatable. The home path is always removed.
    #[arg(long = "strip", value_name = "TEXT")]
    strips: Vec<String>,
    /// Regex pattern to remove, repeatable.
    #[arg(long = "pattern", value_name = "REGEX")]
    patterns: Vec<String>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Show(args) => cmd_show(&args.log),
        Command::Validate(args) => cmd_validate(&args.log),
        Command::Redact(args) => cmd_redact(args),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    config.log_path = if args.no_log {
        None
    } else {
        args.log
            .clone()
            .or(config.log_path)
            .or_else(|| Some(PathBuf::from(DEFAULT_LOG)))
    };
    let engine = Engine::new(config)?;
    if args.reset_log {
        engine.reset_log()?;
    }
    for path in &args.tracked {
        engine.track_repository(path)?;
    }

    let (program, rest) = args.command.split_first().context("no command given")?;
    let mut unit = engine.process_unit(program)?;
    if let Some(description) = &args.description {
        unit = unit.describe(description);
    }
    unit = unit.ignore_exit_code(args.ignore_exit_code);
    for word in rest {
        unit = unit.arg(word.as_str())?;
    }

    let options = RunOptions {
        version_probe: args.version_probe,
        prelude: args.prelude,
        extra_inputs: as_arg_values(&args.inputs),
        extra_outputs: as_arg_values(&args.outputs),
        silent: args.silent,
    };
    let outcome = try_run(&engine, &unit, &options);
    if let Some(fault) = &outcome.fault {
        eprintln!("{:#}", fault);
    }
    let mut code = exit_codes::for_return_code(outcome.code);
    if args.ok_on_skip && code == exit_codes::SKIPPED {
        code = exit_codes::OK;
    }
    Ok(code)
}

fn cmd_show(log: &Path) -> Result<i32> {
    let records = load_records(log)?;
    if records.is_empty() {
        println!("{}: no records", log.display());
        return Ok(exit_codes::OK);
    }
    for record in &records {
        println!("run {}", record.run_id);
        for (path, state) in &record.tracked_repositories {
            let hash = state.hash.as_deref().unwrap_or("?");
            let dirty = if state.dirty { " (dirty)" } else { "" };
            println!("  repo {path} @ {hash}{dirty}");
        }
        for command in &record.commands {
            let start = command.time.start.as_deref().unwrap_or("-");
            let duration = command.time.duration.as_deref().unwrap_or("-");
            println!(
                "  {}  [{}]  start {start}  duration {duration}",
                command.name, command.return_code_meaning,
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(log: &Path) -> Result<i32> {
    let raw =
        fs::read_to_string(log).with_context(|| format!("read run log {}", log.display()))?;
    let records = validate_log(&raw)?;
    println!(
        "{}: valid, {} record{}",
        log.display(),
        records.len(),
        if records.len() == 1 { "" } else { "s" }
    );
    Ok(exit_codes::OK)
}

fn cmd_redact(args: RedactArgs) -> Result<i32> {
    let options = RedactOptions {
        out: args.out,
        strip: args.strips,
        patterns: args.patterns,
    };
    let target = redact_log(&args.log, &options)?;
    println!("{} -> {}", args.log.display(), target.display());
    Ok(exit_codes::OK)
}

fn as_arg_values(paths: &[PathBuf]) -> Vec<ArgValue> {
    paths.iter().map(|path| ArgValue::from(path.as_path())).collect()
}

/// Parse and validate a log: schema conformance plus record parsing.
fn validate_log(raw: &str) -> Result<Vec<RunRecord>> {
    let instance: Value = serde_json::from_str(raw).context("parse log json")?;
    let schema: Value = serde_json::from_str(V1_SCHEMA).context("parse v1 schema")?;
    validate_schema(&instance, &schema)?;
    let records: Vec<RunRecord> = serde_json::from_str(raw).context("parse log as v1 records")?;
    Ok(records)
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use runlog::core::types::ReturnCode;
    use runlog::run::run;
    use runlog::test_support::quiet_config;

    #[test]
    fn parse_run_with_declared_artifacts() {
        let cli = Cli::parse_from([
            "runlog",
            "run",
            "--output",
            "out.png",
            "--ignore-exit-code",
            "--",
            "python",
            "gen.py",
            "out.png",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.outputs, vec![PathBuf::from("out.png")]);
        assert!(args.ignore_exit_code);
        assert_eq!(args.command, vec!["python", "gen.py", "out.png"]);
        assert!(args.log.is_none());
        assert!(!args.silent);
    }

    #[test]
    fn parse_redact_with_patterns() {
        let cli = Cli::parse_from([
            "runlog", "redact", "--log", "a.json", "--strip", "alice", "--pattern", "[0-9]+",
        ]);
        let Command::Redact(args) = cli.command else {
            panic!("expected redact");
        };
        assert_eq!(args.log, PathBuf::from("a.json"));
        assert_eq!(args.strips, vec!["alice"]);
        assert_eq!(args.patterns, vec!["[0-9]+"]);
        assert!(args.out.is_none());
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["runlog", "run"]).is_err());
    }

    #[test]
    fn no_log_conflicts_with_an_explicit_log() {
        assert!(
            Cli::try_parse_from(["runlog", "run", "--log", "a.json", "--no-log", "--", "true"])
                .is_err()
        );
    }

    #[test]
    fn embedded_schema_accepts_a_freshly_written_log() {
        let temp = TempDir::new().expect("tempdir");
        let log = temp.path().join("runlog.json");
        let engine = Engine::new(quiet_config(Some(log.clone()))).expect("engine");
        let unit = engine.process_unit("true").expect("unit");
        run(&engine, &unit, &RunOptions::default()).expect("run");

        let raw = fs::read_to_string(&log).expect("read log");
        let records = validate_log(&raw).expect("valid log");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].commands[0].return_code, ReturnCode::Success);
    }

    #[test]
    fn embedded_schema_rejects_unknown_return_codes() {
        let temp = TempDir::new().expect("tempdir");
        let log = temp.path().join("runlog.json");
        let engine = Engine::new(quiet_config(Some(log.clone()))).expect("engine");
        let unit = engine.process_unit("true").expect("unit");
        run(&engine, &unit, &RunOptions::default()).expect("run");

        let mut instance: Value =
            serde_json::from_str(&fs::read_to_string(&log).expect("read log")).expect("parse");
        *instance
            .pointer_mut("/0/commands/0/return_code")
            .expect("return_code cell") = Value::from(9);
        let raw = serde_json::to_string(&instance).expect("serialize");

        let err = validate_log(&raw).expect_err("schema must reject code 9");
        assert!(err.to_string().contains("schema validation failed"));
    }
}
