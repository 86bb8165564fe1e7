//! End-to-end provenance scenarios through the engine API.
//!
//! These tests drive full run lifecycles and verify what actually lands in
//! the persisted log: produce-then-skip cycles, blocked inputs, nested
//! invocations, repository tracking, mid-run readability, and notification
//! delivery.

use std::fs;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;

use runlog::core::fault::MissingInputError;
use runlog::core::types::{ArgValue, ReturnCode};
use runlog::engine::Engine;
use runlog::invocable::Invocable;
use runlog::io::artifact;
use runlog::io::config::NotifyLevel;
use runlog::io::notify::{CommandSink, Notifier};
use runlog::io::persist::load_records;
use runlog::run::{RunOptions, run};
use runlog::test_support::{init_git_repo, quiet_config};

fn logging_engine(temp: &TempDir) -> (Engine, std::path::PathBuf) {
    let log = temp.path().join("runlog.json");
    let engine = Engine::new(quiet_config(Some(log.clone()))).expect("engine");
    (engine, log)
}

/// Full produce-then-skip cycle:
/// 1. The first run executes and fingerprints the produced output.
/// 2. The second run of the same unit short-circuits without a new record.
#[test]
fn produce_then_skip_cycle() {
    let temp = TempDir::new().expect("tempdir");
    let (engine, log) = logging_engine(&temp);
    let out = temp.path().join("out.txt");

    let unit = Invocable::process("touch")
        .expect("unit")
        .output(out.as_path())
        .expect("output");

    let first = run(&engine, &unit, &RunOptions::default()).expect("first run");
    assert_eq!(first, ReturnCode::Success);
    assert!(out.is_file());

    let records = load_records(&log).expect("load log");
    assert_eq!(records.len(), 1);
    let command = &records[0].commands[0];
    assert_eq!(command.return_code, ReturnCode::Success);
    assert_eq!(command.output.expected, vec![out.display().to_string()]);
    let recomputed = artifact::fingerprint(&[ArgValue::from(out.as_path())]);
    assert_eq!(command.output.found, recomputed);

    let second = run(&engine, &unit, &RunOptions::default()).expect("second run");
    assert_eq!(second, ReturnCode::SkippedUnnecessary);
    let records = load_records(&log).expect("load log again");
    assert_eq!(records[0].commands.len(), 1, "the skip writes no record");
}

/// Each engine session appends its own RunRecord to an existing log.
#[test]
fn sessions_append_their_own_records() {
    let temp = TempDir::new().expect("tempdir");
    let log = temp.path().join("runlog.json");

    for _ in 0..2 {
        let engine = Engine::new(quiet_config(Some(log.clone()))).expect("engine");
        let unit = engine.process_unit("true").expect("unit");
        run(&engine, &unit, &RunOptions::default()).expect("run");
    }

    let records = load_records(&log).expect("load log");
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].run_id, records[1].run_id);
    assert_eq!(records[0].commands.len(), 1);
    assert_eq!(records[1].commands.len(), 1);
}

/// A blocked input stops execution and the log shows exactly why.
#[test]
fn blocked_input_is_fully_recorded() {
    let temp = TempDir::new().expect("tempdir");
    let (engine, log) = logging_engine(&temp);
    let absent = temp.path().join("dataset.csv");

    let unit = Invocable::process("wc")
        .expect("unit")
        .input(absent.as_path())
        .expect("input");
    let err = run(&engine, &unit, &RunOptions::default()).expect_err("blocked");

    let missing = err
        .downcast_ref::<MissingInputError>()
        .expect("typed fault");
    assert_eq!(missing.missing, vec![absent.display().to_string()]);

    let command = &load_records(&log).expect("load log")[0].commands[0];
    assert_eq!(command.return_code, ReturnCode::InputMissing);
    assert_eq!(command.return_code_meaning, "input missing");
    assert_eq!(command.input.missing, vec![absent.display().to_string()]);
    assert!(command.input.found.is_empty());
    assert!(command.output.found.is_empty());
}

/// A function unit that invokes two child units through the same engine
/// produces a single record whose capture interleaves all three outputs.
#[test]
fn nested_invocations_share_one_record() {
    let temp = TempDir::new().expect("tempdir");
    let (engine, log) = logging_engine(&temp);
    let inner = engine.clone();

    let parent = Invocable::function("pipeline", move |_args, sink| {
        let first = Invocable::process("echo")?.arg("step one")?;
        run(&inner, &first, &RunOptions::default())?;
        writeln!(sink, "between steps")?;
        let second = Invocable::process("echo")?.arg("step two")?;
        run(&inner, &second, &RunOptions::default())?;
        Ok(Value::from("done"))
    });
    let code = run(&engine, &parent, &RunOptions::default()).expect("run");

    assert_eq!(code, ReturnCode::Success);
    assert_eq!(engine.function_return(), Some(Value::from("done")));

    let records = load_records(&log).expect("load log");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].commands.len(), 1, "children write no records");
    let command = &records[0].commands[0];
    assert_eq!(command.name, "pipeline");
    let text = command.text_output.join("\n");
    let one = text.find("step one").expect("first child output");
    let between = text.find("between steps").expect("parent output");
    let two = text.find("step two").expect("second child output");
    assert!(one < between && between < two, "capture preserves order");
}

/// Repository state is inspected at registration and embedded per record.
#[test]
fn tracked_repository_state_lands_in_the_record() {
    let temp = TempDir::new().expect("tempdir");
    let repo = temp.path().join("project");
    fs::create_dir(&repo).expect("mkdir");
    init_git_repo(&repo);
    let log = temp.path().join("runlog.json");

    let engine = Engine::new(quiet_config(Some(log.clone()))).expect("engine");
    engine.track_repository(&repo).expect("track");
    let unit = engine.process_unit("true").expect("unit");
    run(&engine, &unit, &RunOptions::default()).expect("run");

    let records = load_records(&log).expect("load log");
    let state = records[0]
        .tracked_repositories
        .get(&repo.display().to_string())
        .expect("tracked entry");
    assert!(state.hash.is_some());
    assert!(!state.dirty);

    // A second session sees the working tree dirty. Only tracked files
    // count, so modify the committed one.
    fs::write(repo.join("README.md"), "changed\n").expect("dirty the repo");
    let engine = Engine::new(quiet_config(Some(log.clone()))).expect("engine");
    engine.track_repository(&repo).expect("track again");
    let unit = engine.process_unit("true").expect("unit");
    run(&engine, &unit, &RunOptions::default()).expect("run");

    let records = load_records(&log).expect("reload log");
    let state = records[1]
        .tracked_repositories
        .get(&repo.display().to_string())
        .expect("tracked entry");
    assert!(state.dirty);
    assert!(
        state
            .dirty_files
            .iter()
            .any(|file| file.contains("README.md"))
    );
}

/// The log is readable while the unit is still executing: the in-progress
/// record carries the not-run code and a start stamp but no end.
#[test]
fn in_progress_record_is_readable_mid_run() {
    let temp = TempDir::new().expect("tempdir");
    let (engine, log) = logging_engine(&temp);

    let observed = Arc::new(Mutex::new(None));
    let observer = Arc::clone(&observed);
    let probe = log.clone();
    let unit = Invocable::function("prober", move |_args, _sink| {
        let records = load_records(&probe)?;
        let command = &records[0].commands[0];
        *observer.lock().expect("observer lock") = Some((
            command.return_code,
            command.time.start.is_some(),
            command.time.end.is_none(),
        ));
        Ok(Value::Null)
    });
    run(&engine, &unit, &RunOptions::default()).expect("run");

    let (code, started, unfinished) = observed
        .lock()
        .expect("observed lock")
        .expect("callable read the log");
    assert_eq!(code, ReturnCode::NotRun);
    assert!(started, "start is stamped before execution");
    assert!(unfinished, "end is stamped only at completion");
}

/// Output beyond the configured cap is dropped and marked, not fatal.
#[test]
fn capture_cap_truncates_with_a_marker() {
    let temp = TempDir::new().expect("tempdir");
    let log = temp.path().join("runlog.json");
    let mut config = quiet_config(Some(log.clone()));
    config.capture_limit_bytes = 64;
    let engine = Engine::new(config).expect("engine");

    let unit = Invocable::process("seq")
        .expect("unit")
        .arg(1_i64)
        .expect("arg")
        .arg(100_i64)
        .expect("arg");
    let code = run(&engine, &unit, &RunOptions::default()).expect("run");

    assert_eq!(code, ReturnCode::Success);
    let command = &load_records(&log).expect("load log")[0].commands[0];
    let marker = command
        .text_output
        .last()
        .expect("text output is non-empty");
    assert!(marker.contains("bytes dropped"), "got: {marker}");
}

/// Notifications are delivered around the run; a failing sink changes
/// nothing about the outcome and is noted in the log.
#[test]
fn notifications_wrap_the_run_and_failures_stay_out_of_the_outcome() {
    let temp = TempDir::new().expect("tempdir");
    let (engine, log) = logging_engine(&temp);
    let inbox = temp.path().join("inbox.txt");
    let sink = CommandSink::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("cat >> {}", inbox.display()),
    ])
    .expect("sink");
    engine.set_notifier(Notifier::new(Arc::new(sink), NotifyLevel::StartAndEnd));

    let unit = engine.process_unit("true").expect("unit");
    run(&engine, &unit, &RunOptions::default()).expect("run");

    let delivered = fs::read_to_string(&inbox).expect("read inbox");
    assert!(delivered.contains("START true"));
    assert!(delivered.contains("END true"));
    assert!(delivered.contains("run successful"));

    // A sink that always fails leaves the run untouched and the log notes it.
    let broken = CommandSink::new(vec!["false".to_string()]).expect("sink");
    engine.set_notifier(Notifier::new(Arc::new(broken), NotifyLevel::StartAndEnd));
    let unit = engine.process_unit("true").expect("unit");
    let code = run(&engine, &unit, &RunOptions::default()).expect("run");
    assert_eq!(code, ReturnCode::Success);

    let records = load_records(&log).expect("load log");
    let noted = records[0]
        .engine
        .output
        .iter()
        .flatten()
        .any(|line| line.contains("Failed to deliver notification"));
    assert!(noted);
}
