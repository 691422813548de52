// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{TempRun, recorded_events, run_events};
use chrono::DateTime;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::fs;
use wpt_results_metadata::{FullResults, ImageDiffStats, ResultType};
use wpt_results_processor::{
    processor::ResultsProcessor,
    report::{FAILING_RESULTS_FILE_NAME, FULL_RESULTS_FILE_NAME, ResultsWriter},
};

const CLONE_NODE: &str = "external/wpt/dom/nodes/Node-cloneNode.html";
const REFTEST: &str = "external/wpt/css/css-flexbox/align-content-001.html";

async fn process_recorded_run(run: &TempRun) -> ResultsProcessor {
    let processor = ResultsProcessor::new(&run.config(), run.sink()).unwrap();
    run_events(processor, recorded_events()).await
}

#[tokio::test]
async fn recorded_run_results() {
    let run = TempRun::new();
    let processor = process_recorded_run(&run).await;

    assert_eq!(processor.iteration(), 2);
    assert_eq!(processor.running_tests().count(), 0);
    assert_eq!(
        processor.num_failures_by_type(),
        &btreemap! {
            ResultType::Pass => 3,
            ResultType::Failure => 2,
            ResultType::Crash => 1,
            ResultType::Timeout => 1,
        }
    );
    assert_eq!(processor.num_regressions(), 1);

    let results = processor.full_results(false, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    assert_eq!(results.version, 3);
    assert!(!results.interrupted);
    assert_eq!(results.seconds_since_epoch, 1_700_000_000);
    assert_eq!(results.num_failures_by_type[&ResultType::Skip], 0);
    assert_eq!(results.num_passes, 4);
    assert_eq!(results.num_regressions, 1);
    assert_eq!(results.skipped, 0);

    let names: Vec<_> = results.tests.leaves().into_iter().map(|(name, _)| name).collect();
    assert_eq!(
        names,
        [
            "external/wpt/css/css-flexbox/align-content-001.html",
            "external/wpt/dom/historical.html",
            "external/wpt/dom/nodes/Node-cloneNode.html",
            "external/wpt/editing/crashtests/delete-crash.html",
            "external/wpt/url/url-constructor.any.worker.html",
            "virtual/fake-flag/external/wpt/dom/historical.html",
            "wpt_internal/fenced_frame/basic.https.html",
        ]
    );
}

#[tokio::test]
async fn baselines_decide_testharness_verdicts() {
    let run = TempRun::new();
    let processor = process_recorded_run(&run).await;
    let results = processor.full_results(false, DateTime::UNIX_EPOCH);

    // The platform baseline expects the failing subtest; the generic one does not.
    let historical = results.tests.get("external/wpt/dom/historical.html").unwrap();
    assert_eq!(historical.actual, "PASS");
    assert!(historical.has_stderr);
    assert!(!historical.is_unexpected);

    // Virtual tests fall back to their base test's baseline.
    let virtual_historical = results
        .tests
        .get("virtual/fake-flag/external/wpt/dom/historical.html")
        .unwrap();
    assert_eq!(virtual_historical.actual, "PASS");

    let clone_node = results.tests.get(CLONE_NODE).unwrap();
    assert_eq!(clone_node.expected, "PASS");
    assert_eq!(clone_node.actual, "FAIL PASS");
    assert!(clone_node.is_flaky);
    assert!(clone_node.is_slow_test);
    assert!(!clone_node.is_regression);
    assert_eq!(clone_node.shard, Some(0));
    assert_eq!(clone_node.time, Some(0.2));
    assert_eq!(
        clone_node.artifacts,
        btreemap! {
            "actual_text".to_owned() => vec![
                "layout-test-results/external/wpt/dom/nodes/Node-cloneNode-actual.txt".to_owned(),
            ],
            "stderr".to_owned() => vec![
                "layout-test-results/external/wpt/dom/nodes/Node-cloneNode-stderr.txt".to_owned(),
            ],
        }
    );
    assert_eq!(
        String::from_utf8(run.read_artifact("external/wpt/dom/nodes/Node-cloneNode-actual.txt"))
            .unwrap(),
        "This is a testharness.js-based test.\n\
         [FAIL] createElement(a)\n  \
         assert_equals: expected \"a\" but got \"b\"\n\
         Harness: the test ran to completion.\n"
    );
}

#[tokio::test]
async fn expectations_and_diagnostics() {
    let run = TempRun::new();
    let processor = process_recorded_run(&run).await;
    let results = processor.full_results(false, DateTime::UNIX_EPOCH);

    // Expected by a tag-filtered line.
    let worker = results
        .tests
        .get("external/wpt/url/url-constructor.any.worker.html")
        .unwrap();
    assert_eq!(worker.expected, "CRASH");
    assert_eq!(worker.actual, "CRASH");
    assert!(!worker.is_unexpected);
    assert_eq!(
        worker.artifacts["crash_log"],
        ["layout-test-results/external/wpt/url/url-constructor.any.worker-crash-log.txt"]
    );
    assert_eq!(
        run.read_artifact("external/wpt/url/url-constructor.any.worker-crash-log.txt"),
        b"[1.234][SEVERE]: renderer crashed\n"
    );

    // Expected by a glob.
    let crashtest = results
        .tests
        .get("external/wpt/editing/crashtests/delete-crash.html")
        .unwrap();
    assert_eq!(crashtest.expected, "TIMEOUT");
    assert_eq!(crashtest.actual, "TIMEOUT");
    assert!(crashtest.has_stderr);
    assert_eq!(
        run.read_artifact("external/wpt/editing/crashtests/delete-crash-stderr.txt"),
        b"Harness: test timed out\n"
    );

    let internal = results
        .tests
        .get("wpt_internal/fenced_frame/basic.https.html")
        .unwrap();
    assert_eq!(internal.actual, "PASS");
    assert!(internal.artifacts.is_empty());
}

#[tokio::test]
async fn reftest_screenshots_and_retries() {
    let run = TempRun::new();
    let processor = process_recorded_run(&run).await;
    let results = processor.full_results(false, DateTime::UNIX_EPOCH);

    let reftest = results.tests.get(REFTEST).unwrap();
    assert_eq!(reftest.actual, "FAIL FAIL");
    assert!(!reftest.is_flaky);
    assert!(reftest.is_unexpected);
    assert!(reftest.is_regression);
    assert_eq!(
        reftest.image_diff_stats,
        Some(ImageDiffStats {
            max_difference: 255,
            max_pixels: 1,
        })
    );
    assert_eq!(
        reftest.artifacts["actual_image"],
        [
            "layout-test-results/external/wpt/css/css-flexbox/align-content-001-actual.png",
            "layout-test-results/retry_1/external/wpt/css/css-flexbox/align-content-001-actual.png",
        ]
    );
    assert_eq!(reftest.artifacts["expected_image"].len(), 2);
    assert_eq!(reftest.artifacts["image_diff"].len(), 2);

    let diff = run.read_artifact("retry_1/external/wpt/css/css-flexbox/align-content-001-diff.png");
    assert!(diff.starts_with(b"\x89PNG"), "diff image is a PNG");
}

#[tokio::test]
async fn sink_records() {
    let run = TempRun::new();
    process_recorded_run(&run).await;

    let records: Vec<Value> = fs::read_to_string(run.sink_output())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 9, "one record per test attempt");

    let reftest_records: Vec<&Value> = records
        .iter()
        .map(|record| &record["testResult"])
        .filter(|record| {
            record["testId"] == "ninja://:blink_wpt_tests/external/wpt/css/css-flexbox/align-content-001.html"
        })
        .collect();
    assert_eq!(reftest_records.len(), 2);
    for record in reftest_records {
        assert_eq!(record["status"], "FAIL");
        assert_eq!(record["expected"], false);
        assert!(
            record["summaryHtml"]
                .as_str()
                .unwrap()
                .contains("https://wpt.fyi/results/css%2Fcss-flexbox%2Falign-content-001.html"),
            "regressions link to wpt.fyi: {record}"
        );
        assert_eq!(
            record["testMetadata"]["location"]["fileName"],
            "//third_party/blink/web_tests/external/wpt/css/css-flexbox/align-content-001.html"
        );
    }

    let worker = records
        .iter()
        .map(|record| &record["testResult"])
        .find(|record| record["testId"].as_str().unwrap().ends_with("url-constructor.any.worker.html"))
        .unwrap();
    assert_eq!(worker["status"], "CRASH");
    assert_eq!(worker["expected"], true);
    assert_eq!(
        worker["testMetadata"]["location"]["fileName"],
        "//third_party/blink/web_tests/external/wpt/url/url-constructor.any.js",
        "the source file comes from the manifest"
    );
    assert!(worker.get("summaryHtml").is_none());
}

#[tokio::test]
async fn written_reports() {
    let run = TempRun::new();
    let processor = process_recorded_run(&run).await;
    let results = processor.full_results(false, DateTime::UNIX_EPOCH);
    let json_test_results = run.artifacts_dir().join("../output.json");
    ResultsWriter::new(run.artifacts_dir())
        .write(&results, Some(&json_test_results))
        .unwrap();

    let full: FullResults = serde_json::from_slice(&run.read_artifact(FULL_RESULTS_FILE_NAME)).unwrap();
    assert_eq!(full, results);
    assert_eq!(
        fs::read(&json_test_results).unwrap(),
        run.read_artifact(FULL_RESULTS_FILE_NAME)
    );

    let failing = String::from_utf8(run.read_artifact(FAILING_RESULTS_FILE_NAME)).unwrap();
    let failing = failing
        .strip_prefix("ADD_RESULTS(")
        .and_then(|rest| rest.strip_suffix(");"))
        .unwrap();
    let failing: FullResults = serde_json::from_str(failing).unwrap();
    let names: Vec<_> = failing.tests.leaves().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, [REFTEST]);
    assert_eq!(failing.num_regressions, 1);
}
