// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests that run the `wpt-results` binary against the recorded fixture run.

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use std::{
    fs,
    io::Write,
    process::{Command, Output, Stdio},
};
use wpt_results_metadata::{FullResults, WptResultsExitCode};

fn fixtures_dir() -> Utf8PathBuf {
    Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures/wpt-results")
}

struct CliRun {
    dir: Utf8TempDir,
}

impl CliRun {
    fn new() -> Self {
        let dir = Utf8TempDir::new().unwrap();
        let web_tests = fixtures_dir().join("web_tests");
        let config = formatdoc! {r#"
            [processor]
            test-name-prefix = "ninja://:blink_wpt_tests"

            [web-tests]
            dir = '{web_tests}'
            wpt-manifest = "external/wpt/MANIFEST.json"
            internal-manifest = "wpt_internal/MANIFEST.json"
            baseline-search-path = ["platform/linux"]
            expectations-files = ["TestExpectations"]
            platform-tags = ["Linux", "Release"]
        "#};
        fs::write(dir.path().join("wpt-results.toml"), config).unwrap();
        Self { dir }
    }

    fn artifacts_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("layout-test-results")
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_wpt-results"));
        command
            .arg(subcommand)
            .arg("--config-file")
            .arg(self.dir.path().join("wpt-results.toml"))
            .arg("--artifacts-dir")
            .arg(self.artifacts_dir())
            .env("WPT_RESULTS_COLOR", "never")
            .env_remove("WPT_RESULTS_LOG");
        command
    }

    fn full_results(&self) -> FullResults {
        let contents = fs::read(self.artifacts_dir().join("full_results.json")).unwrap();
        serde_json::from_slice(&contents).unwrap()
    }
}

fn assert_exit_code(output: &Output, expected: i32) {
    assert_eq!(
        output.status.code(),
        Some(expected),
        "unexpected exit code, stderr:\n{}",
        String::from_utf8_lossy(&output.stderr),
    );
}

#[test]
fn process_recorded_run() {
    let run = CliRun::new();
    let json_test_results = run.dir.path().join("output.json");
    let output = run
        .command("process")
        .arg("--events")
        .arg(fixtures_dir().join("events/run.jsonl"))
        .arg("--shard-index")
        .arg("3")
        .arg("--json-test-results")
        .arg(&json_test_results)
        .output()
        .unwrap();

    // align-content-001.html fails unexpectedly on every attempt.
    assert_exit_code(&output, WptResultsExitCode::REGRESSIONS);
    let results = run.full_results();
    assert!(!results.interrupted);
    assert_eq!(results.num_regressions, 1);
    assert_eq!(results.tests.leaves().len(), 7);
    assert!(
        results
            .tests
            .leaves()
            .iter()
            .all(|(_, leaf)| leaf.shard == Some(3))
    );
    assert!(json_test_results.exists());
    assert!(run.artifacts_dir().join("failing_results.json").exists());
    assert!(run.artifacts_dir().join("full_results_jsonp.js").exists());
}

#[test]
fn process_from_stdin() {
    let run = CliRun::new();
    let events = fs::read_to_string(fixtures_dir().join("events/run.jsonl")).unwrap();
    // Only the first iteration, with a malformed line mixed in.
    let first_iteration: String = events
        .lines()
        .take_while(|line| !line.contains("\"suite_end\""))
        .flat_map(|line| [line, "\n"])
        .chain(["{not json\n"])
        .collect();

    let mut child = run
        .command("process")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(first_iteration.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();

    // Node-cloneNode.html never got to pass on retry.
    assert_exit_code(&output, WptResultsExitCode::REGRESSIONS);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("skipping line"),
        "malformed line is reported: {stderr}"
    );
    assert_eq!(run.full_results().num_regressions, 2);
}

#[test]
fn failure_threshold_exceeded() {
    let run = CliRun::new();
    let output = run
        .command("process")
        .arg("--events")
        .arg(fixtures_dir().join("events/run.jsonl"))
        .arg("--failure-threshold")
        .arg("1")
        .output()
        .unwrap();

    // The file is usually queued in full before the consumer reaches the second unexpected
    // failure, so the threshold is noticed while the stream drains.
    assert_exit_code(&output, WptResultsExitCode::THRESHOLD_EXCEEDED);
    assert!(run.full_results().interrupted);
}

#[test]
fn lines_that_are_not_utf8_are_skipped() {
    let run = CliRun::new();
    let recorded = fs::read(fixtures_dir().join("events/run.jsonl")).unwrap();
    let first_line = recorded.iter().position(|&byte| byte == b'\n').unwrap() + 1;
    let mut events = recorded[..first_line].to_vec();
    events.extend_from_slice(b"{\"action\":\"log\",\"time\":1,\"message\":\"\xff\xfe\"}\n");
    events.extend_from_slice(&recorded[first_line..]);
    let events_path = run.dir.path().join("events.jsonl");
    fs::write(&events_path, events).unwrap();

    let output = run
        .command("process")
        .arg("--events")
        .arg(&events_path)
        .output()
        .unwrap();

    assert_exit_code(&output, WptResultsExitCode::REGRESSIONS);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("skipping line 2 of event stream"),
        "invalid line is reported: {stderr}"
    );
    let results = run.full_results();
    assert!(!results.interrupted);
    assert_eq!(results.tests.leaves().len(), 7);
}

#[test]
fn unknown_runner_status_is_fatal() {
    let run = CliRun::new();
    let events = run.dir.path().join("events.jsonl");
    fs::write(
        &events,
        concat!(
            r#"{"action":"test_start","time":1,"test":"/dom/historical.html"}"#,
            "\n",
            r#"{"action":"test_end","time":2,"test":"/dom/historical.html","status":"EXPLODED"}"#,
            "\n",
        ),
    )
    .unwrap();

    let output = run
        .command("process")
        .arg("--events")
        .arg(&events)
        .output()
        .unwrap();
    assert_exit_code(&output, WptResultsExitCode::INVALID_RUNNER_STATUS);
    assert!(!run.artifacts_dir().join("full_results.json").exists());
}

#[test]
fn missing_event_file() {
    let run = CliRun::new();
    let output = run
        .command("process")
        .arg("--events")
        .arg(run.dir.path().join("does-not-exist.jsonl"))
        .output()
        .unwrap();
    assert_exit_code(&output, WptResultsExitCode::INPUT_READ_ERROR);
}

#[test]
fn merge_wpt_report() {
    let run = CliRun::new();
    let report = run.dir.path().join("wpt_reports.json");
    fs::write(
        &report,
        concat!(
            r#"{"run_info":{"os":"linux"},"results":[{"test":"/a.html","status":"OK"}]}"#,
            "\n",
            r#"{"run_info":{"os":"linux"},"results":[{"test":"/a.html","status":"ERROR"}]}"#,
            "\n",
        ),
    )
    .unwrap();

    let output = run.command("merge-wpt-report").arg(&report).output().unwrap();
    assert_exit_code(&output, WptResultsExitCode::OK);

    let merged: serde_json::Value =
        serde_json::from_slice(&fs::read(run.artifacts_dir().join("wpt_reports.json")).unwrap())
            .unwrap();
    assert_eq!(merged["results"].as_array().unwrap().len(), 2);
    assert_eq!(merged["run_info"]["os"], "linux");
}
