// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{TempRun, recorded_events, run_events};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::fs;
use wpt_results_processor::{baseline::ALL_PASS_MARKER, processor::ResultsProcessor};

#[tokio::test]
async fn reset_results_rewrites_baselines() {
    let run = TempRun::new();
    let mut config = run.config();
    config.processor.reset_results = true;
    let processor = ResultsProcessor::new(&config, run.sink()).unwrap();
    let processor = run_events(processor, recorded_events()).await;

    // New baselines go to the first directory on the search path.
    let platform_dir = run.web_tests_dir().join("platform/linux");
    let read_baseline = |path: &str| {
        fs::read_to_string(platform_dir.join(path))
            .unwrap_or_else(|error| panic!("reading baseline {path}: {error}"))
    };

    // Only the first iteration counts: the passing retry doesn't overwrite the failure.
    assert_eq!(
        read_baseline("external/wpt/dom/nodes/Node-cloneNode-expected.txt"),
        indoc! {r#"
            This is a testharness.js-based test.
            [FAIL] createElement(a)
              assert_equals: expected "a" but got "b"
            Harness: the test ran to completion.
        "#}
    );
    assert_eq!(
        read_baseline("wpt_internal/fenced_frame/basic.https-expected.txt"),
        format!("{ALL_PASS_MARKER}\n")
    );
    assert_eq!(
        read_baseline("external/wpt/dom/historical-expected.txt"),
        indoc! {r#"
            This is a testharness.js-based test.
            [FAIL] Node.prototype.isSupported
              assert_false: expected false got true
            [PASS] DOMError removed
            Harness: the test ran to completion.
        "#}
    );

    // Crashes never become baselines, and tests without subtests have no text baseline.
    assert!(
        !platform_dir
            .join("external/wpt/url/url-constructor.any.worker-expected.txt")
            .exists()
    );
    assert!(
        !platform_dir
            .join("external/wpt/css/css-flexbox/align-content-001-expected.txt")
            .exists()
    );

    // Passing results get text artifacts too when resetting.
    let results = processor.full_results(false, chrono::DateTime::UNIX_EPOCH);
    let internal = results
        .tests
        .get("wpt_internal/fenced_frame/basic.https.html")
        .unwrap();
    assert_eq!(
        internal.artifacts["actual_text"],
        ["layout-test-results/wpt_internal/fenced_frame/basic.https-actual.txt"]
    );
}
