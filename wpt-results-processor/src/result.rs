// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test result aggregation.
//!
//! A test attempt starts as a [`RunningTest`], accumulates subtest outcomes, and is consumed by
//! [`RunningTest::finish`] to produce an immutable [`WptResult`].

use crate::{
    artifacts::ArtifactMap,
    baseline::{Baseline, BaselineMismatch, Outcome, Outcomes, format_baseline},
    errors::{BaselineParseError, EventProcessingError, UnknownStatusError},
    status::{BaselineStatus, RunnerStatus, TestType},
};
use itertools::Itertools;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::{collections::BTreeSet, time::Duration};
use swrite::{SWrite, swrite};
use tracing::warn;
use wpt_results_metadata::{ImageDiffStats, ResultType};

const WPT_DOC_URL: &str =
    "https://chromium.googlesource.com/chromium/src/+/HEAD/docs/testing/run_web_platform_tests.md";
const WPT_FYI_BASE_URL: &str = "https://wpt.fyi/results/";
const WPT_FYI_QUERY: &str = "?label=experimental&label=master&aligned";
const WPT_PREFIX: &str = "external/wpt/";

// Everything except ASCII alphanumerics and `_.-~` is escaped, including `/`.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// The generic part of a test result, shared by every kind of web test.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRecord {
    /// The full test name.
    pub name: String,

    /// The aggregate result.
    pub actual: ResultType,

    /// The declared expected results.
    pub expected: BTreeSet<ResultType>,

    /// Whether `actual` is outside `expected`.
    pub unexpected: bool,

    /// Whether the result is an unexpected non-pass.
    pub is_regression: bool,

    /// The start timestamp, in milliseconds.
    pub started: i64,

    /// How long the attempt took.
    pub took: Duration,

    /// Artifacts produced for this attempt.
    pub artifacts: ArtifactMap,

    /// Image comparison statistics, for reftests with differing screenshots.
    pub image_diff_stats: Option<ImageDiffStats>,
}

/// The WPT-specific part of a test result.
#[derive(Clone, Debug, PartialEq)]
pub struct SubtestRecord {
    /// The test type, from the WPT manifest.
    pub test_type: TestType,

    /// The path of the test's source file, relative to the web tests directory.
    pub file_path: String,

    /// Observed subtest outcomes, in arrival order.
    pub outcomes: Outcomes,

    /// Diagnostic lines, each ending in a newline. Harness diagnostics come first.
    pub messages: Vec<String>,

    /// Whether any diagnostics were produced.
    pub has_stderr: bool,

    /// The raw baseline text the test was judged against, if one exists.
    pub baseline_text: Option<String>,
}

/// The information needed to start a test attempt.
#[derive(Clone, Debug)]
pub struct TestStart {
    /// The full test name.
    pub name: String,

    /// The test type.
    pub test_type: TestType,

    /// The path of the test's source file, relative to the web tests directory.
    pub file_path: String,

    /// The start timestamp, in milliseconds.
    pub started: i64,

    /// The declared expected results.
    pub expected: BTreeSet<ResultType>,

    /// The raw baseline text, if a baseline exists.
    pub baseline_text: Option<String>,
}

/// A test attempt that has started but not ended.
#[derive(Debug)]
pub struct RunningTest {
    start: TestStart,
    baseline: Result<Baseline, BaselineParseError>,
    outcomes: Outcomes,
    messages: Vec<String>,
    has_stderr: bool,
}

impl RunningTest {
    /// Starts a test attempt.
    ///
    /// The baseline text, if present, is parsed up front. A corrupt baseline does not prevent the
    /// test from running: the test is judged as failing when it ends.
    pub fn new(start: TestStart) -> Self {
        let baseline = match &start.baseline_text {
            Some(text) => Baseline::parse(text),
            None => Ok(Baseline::default()),
        };
        Self {
            start,
            baseline,
            outcomes: Outcomes::new(),
            messages: Vec::new(),
            has_stderr: false,
        }
    }

    /// Returns the test name.
    pub fn name(&self) -> &str {
        &self.start.name
    }

    /// Returns the test type.
    pub fn test_type(&self) -> TestType {
        self.start.test_type
    }

    /// Returns the declared expected results.
    pub fn expected(&self) -> &BTreeSet<ResultType> {
        &self.start.expected
    }

    /// Records a subtest status.
    ///
    /// Statuses that cannot be recorded in a baseline (including unknown ones) are ignored, as
    /// are all statuses for test types without subtests. Messages are always kept as
    /// diagnostics.
    pub fn record_subtest(
        &mut self,
        subtest: &str,
        status: &str,
        message: Option<&str>,
    ) -> Result<(), EventProcessingError> {
        let status = BaselineStatus::from_raw(status)
            .filter(|_| self.start.test_type.can_have_subtests());
        if status.is_some() && self.outcomes.subtests().contains_key(subtest) {
            return Err(EventProcessingError::DuplicateSubtest {
                test: self.start.name.clone(),
                subtest: subtest.to_owned(),
            });
        }

        let message = message.filter(|message| !message.is_empty());
        if let Some(message) = message {
            self.messages.push(format!("{subtest}: {message}\n"));
            self.has_stderr = true;
        }
        if let Some(status) = status {
            self.outcomes
                .insert_subtest(subtest, Outcome::new(status, message.map(str::to_owned)));
        }
        Ok(())
    }

    /// Ends the test attempt with a test-level status, producing the final result.
    pub fn finish(
        mut self,
        status: &str,
        message: Option<&str>,
        ended: i64,
    ) -> Result<WptResult, UnknownStatusError> {
        let status: RunnerStatus = status.parse()?;
        let test_type = self.start.test_type;

        let message = message.filter(|message| !message.is_empty());
        if let Some(message) = message {
            self.messages.insert(0, format!("Harness: {message}\n"));
            self.has_stderr = true;
        }
        if test_type.can_have_subtests()
            && let Some(harness_status) = BaselineStatus::from_runner(status)
        {
            self.outcomes.set_harness_error(Outcome::new(
                harness_status,
                message.map(str::to_owned),
            ));
        }

        let mut actual = status.result_type();
        if test_type.can_have_subtests()
            && !matches!(actual, ResultType::Timeout | ResultType::Crash)
        {
            actual = if self.baseline_matches() {
                ResultType::Pass
            } else {
                ResultType::Failure
            };
        }

        let unexpected = !self.start.expected.contains(&actual);
        let took = u64::try_from(ended.saturating_sub(self.start.started)).unwrap_or(0);
        let TestStart {
            name,
            test_type,
            file_path,
            started,
            expected,
            baseline_text,
        } = self.start;

        Ok(WptResult {
            record: ResultRecord {
                name,
                actual,
                expected,
                unexpected,
                is_regression: unexpected && actual != ResultType::Pass,
                started,
                took: Duration::from_millis(took),
                artifacts: ArtifactMap::new(),
                image_diff_stats: None,
            },
            wpt: SubtestRecord {
                test_type,
                file_path,
                outcomes: self.outcomes,
                messages: self.messages,
                has_stderr: self.has_stderr,
                baseline_text,
            },
        })
    }

    fn baseline_matches(&self) -> bool {
        let baseline = match &self.baseline {
            Ok(baseline) => baseline,
            Err(error) => {
                warn!(
                    "treating {} as failing because its baseline is invalid: {error}",
                    self.start.name,
                );
                return false;
            }
        };
        match baseline.compare(&self.outcomes) {
            Ok(()) => true,
            Err(BaselineMismatch::StaleSubtests(stale)) => {
                warn!(
                    "{}: subtests in the baseline did not run: {}",
                    self.start.name,
                    stale.iter().join(", "),
                );
                false
            }
            Err(_) => false,
        }
    }
}

/// The final result of one attempt of a WPT test.
#[derive(Clone, Debug, PartialEq)]
pub struct WptResult {
    record: ResultRecord,
    wpt: SubtestRecord,
}

impl WptResult {
    /// Returns the generic result record.
    pub fn record(&self) -> &ResultRecord {
        &self.record
    }

    /// Returns the WPT-specific details.
    pub fn wpt(&self) -> &SubtestRecord {
        &self.wpt
    }

    /// Returns the full test name.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Returns the aggregate result.
    pub fn actual(&self) -> ResultType {
        self.record.actual
    }

    /// Returns true if the result was not among the expected results.
    pub fn unexpected(&self) -> bool {
        self.record.unexpected
    }

    /// Returns true if the result was an unexpected non-pass.
    pub fn is_regression(&self) -> bool {
        self.record.is_regression
    }

    /// Returns true if the test type is judged against a text baseline.
    pub fn can_have_subtests(&self) -> bool {
        self.wpt.test_type.can_have_subtests()
    }

    /// Renders the observed outcomes as baseline text.
    pub fn format_baseline(&self) -> String {
        format_baseline(self.wpt.test_type, &self.wpt.outcomes)
    }

    /// Takes the diagnostic lines out of the result, leaving `has_stderr` set.
    pub(crate) fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.wpt.messages)
    }

    pub(crate) fn set_artifacts(
        &mut self,
        artifacts: ArtifactMap,
        image_diff_stats: Option<ImageDiffStats>,
    ) {
        self.record.artifacts = artifacts;
        self.record.image_diff_stats = image_diff_stats;
    }

    /// Renders an HTML summary of a regression for the result sink.
    ///
    /// Returns `None` for results that are not regressions.
    pub fn summary_html(&self) -> Option<String> {
        if !self.record.is_regression {
            return None;
        }

        let mut summary = format!(
            "<p><strong>This WPT was run against <code>chrome</code> using \
             <code>chromedriver</code>. See <a href=\"{WPT_DOC_URL}\">these \
             instructions</a> about running these tests locally and triaging \
             failures.</strong></p>"
        );
        if let Some(url) = wpt_fyi_url(&self.record.name) {
            swrite!(summary, "<p><a href=\"{url}\">Latest wpt.fyi results</a></p>");
        }
        for artifact_id in ["stderr", "crash_log"] {
            if self.record.artifacts.contains(artifact_id) {
                swrite!(
                    summary,
                    "<h3>{artifact_id}</h3><p><text-artifact artifact-id=\"{artifact_id}\"/></p>"
                );
            }
        }
        Some(summary)
    }
}

/// Returns the wpt.fyi results page for a test under `external/wpt/`.
pub fn wpt_fyi_url(test: &str) -> Option<String> {
    let test = test.strip_prefix(WPT_PREFIX)?;
    let encoded = utf8_percent_encode(test, QUERY_COMPONENT)
        .to_string()
        .replace("%20", "+");
    Some(format!("{WPT_FYI_BASE_URL}{encoded}{WPT_FYI_QUERY}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use maplit::btreeset;
    use test_case::test_case;

    fn start(test_type: TestType, baseline_text: Option<&str>) -> RunningTest {
        RunningTest::new(TestStart {
            name: "external/wpt/dom/a.html".to_owned(),
            test_type,
            file_path: "external/wpt/dom/a.html".to_owned(),
            started: 1000,
            expected: btreeset! {ResultType::Pass},
            baseline_text: baseline_text.map(str::to_owned),
        })
    }

    #[test]
    fn all_subtests_pass() {
        let mut test = start(TestType::Testharness, None);
        test.record_subtest("a", "PASS", None).unwrap();
        test.record_subtest("b", "PASS", None).unwrap();
        let result = test.finish("OK", None, 2500).unwrap();

        assert_eq!(result.actual(), ResultType::Pass);
        assert!(!result.unexpected());
        assert!(!result.is_regression());
        assert_eq!(result.record().took, Duration::from_millis(1500));
        assert!(!result.wpt().has_stderr);
        assert_eq!(result.summary_html(), None);
    }

    #[test]
    fn failing_subtest_without_baseline() {
        let mut test = start(TestType::Testharness, None);
        test.record_subtest("a", "PASS", None).unwrap();
        test.record_subtest("b", "FAIL", Some("x")).unwrap();
        let result = test.finish("OK", None, 1000).unwrap();

        assert_eq!(result.actual(), ResultType::Failure);
        assert!(result.unexpected());
        assert!(result.is_regression());
        assert_eq!(result.wpt().messages, ["b: x\n"]);
        assert!(result.wpt().has_stderr);
    }

    #[test]
    fn failing_subtest_matching_baseline() {
        let baseline = indoc! {"
            This is a testharness.js-based test.
            [FAIL] b
              x
            Harness: the test ran to completion.
        "};
        let mut test = start(TestType::Testharness, Some(baseline));
        test.record_subtest("a", "PASS", None).unwrap();
        test.record_subtest("b", "FAIL", Some("x")).unwrap();
        let result = test.finish("OK", None, 1000).unwrap();
        assert_eq!(result.actual(), ResultType::Pass);

        let mut test = start(TestType::Testharness, Some(baseline));
        test.record_subtest("b", "FAIL", Some("y")).unwrap();
        let result = test.finish("OK", None, 1000).unwrap();
        assert_eq!(result.actual(), ResultType::Failure, "message differs");
    }

    #[test_case("TIMEOUT", ResultType::Timeout; "timeout")]
    #[test_case("CRASH", ResultType::Crash; "crash")]
    fn timeout_and_crash_override_baseline(status: &str, expected: ResultType) {
        let mut test = start(TestType::Testharness, None);
        test.record_subtest("a", "PASS", None).unwrap();
        let result = test.finish(status, None, 1000).unwrap();
        assert_eq!(result.actual(), expected);
        assert!(result.is_regression());
    }

    #[test]
    fn harness_error_matches_baseline() {
        let baseline = indoc! {"
            This is a testharness.js-based test.
            Harness Error. [ERROR]
              some other message
            Harness: the test ran to completion.
        "};
        let mut test = start(TestType::Testharness, Some(baseline));
        test.record_subtest("a", "PASS", None).unwrap();
        let result = test.finish("ERROR", Some("uncaught"), 1000).unwrap();
        assert_eq!(result.actual(), ResultType::Pass);
        assert_eq!(result.wpt().messages, ["Harness: uncaught\n"]);
        assert_eq!(
            result.format_baseline(),
            indoc! {"
                This is a testharness.js-based test.
                Harness Error. [ERROR]
                  uncaught
                [PASS] a
                Harness: the test ran to completion.
            "}
        );
    }

    #[test]
    fn harness_message_comes_first() {
        let mut test = start(TestType::Testharness, None);
        test.record_subtest("a", "FAIL", Some("first")).unwrap();
        test.record_subtest("b", "FAIL", Some("second")).unwrap();
        let result = test.finish("OK", Some("harness"), 1000).unwrap();
        assert_eq!(
            result.wpt().messages,
            ["Harness: harness\n", "a: first\n", "b: second\n"]
        );
    }

    #[test]
    fn corrupt_baseline_fails() {
        let mut test = start(TestType::Testharness, Some("not a baseline\n"));
        test.record_subtest("a", "PASS", None).unwrap();
        let result = test.finish("OK", None, 1000).unwrap();
        assert_eq!(result.actual(), ResultType::Failure);
    }

    #[test]
    fn reftest_uses_test_status() {
        let mut test = start(TestType::Reftest, None);
        test.record_subtest("ignored", "FAIL", None).unwrap();
        let result = test.finish("FAIL", Some("images differ"), 1000).unwrap();
        assert_eq!(result.actual(), ResultType::Failure);
        assert!(result.wpt().outcomes.is_empty());
        assert!(result.wpt().has_stderr);
    }

    #[test]
    fn crashtest_pass() {
        let test = start(TestType::Crashtest, None);
        let result = test.finish("PASS", None, 1000).unwrap();
        assert_eq!(result.actual(), ResultType::Pass);
    }

    #[test]
    fn unknown_statuses() {
        let mut test = start(TestType::Testharness, None);
        test.record_subtest("a", "WHATEVER", Some("kept"))
            .expect("unknown subtest statuses are ignored");
        assert_eq!(test.outcomes.subtests().len(), 0);

        let error = test.finish("WHATEVER", None, 1000).unwrap_err();
        assert_eq!(error.status(), "WHATEVER");
    }

    #[test]
    fn duplicate_subtest() {
        let mut test = start(TestType::Testharness, None);
        test.record_subtest("a", "PASS", None).unwrap();
        let error = test.record_subtest("a", "FAIL", Some("again")).unwrap_err();
        assert_eq!(
            error,
            EventProcessingError::DuplicateSubtest {
                test: "external/wpt/dom/a.html".to_owned(),
                subtest: "a".to_owned(),
            }
        );
        assert!(test.messages.is_empty(), "rejected event leaves no trace");
    }

    #[test_case(1000, 1250 => Duration::from_millis(250); "in order")]
    #[test_case(1000, 10 => Duration::ZERO; "ends before start")]
    #[test_case(i64::MAX, i64::MIN => Duration::ZERO; "extreme reversed timestamps")]
    #[test_case(i64::MIN, i64::MAX => Duration::from_millis(i64::MAX as u64); "extreme timestamps")]
    fn duration_is_clamped(started: i64, ended: i64) -> Duration {
        let mut test = start(TestType::Crashtest, None);
        test.start.started = started;
        test.finish("PASS", None, ended).unwrap().record().took
    }

    #[test]
    fn expected_failure_is_not_regression() {
        let mut test = RunningTest::new(TestStart {
            name: "wpt_internal/a.html".to_owned(),
            test_type: TestType::Reftest,
            file_path: "wpt_internal/a.html".to_owned(),
            started: 0,
            expected: btreeset! {ResultType::Failure},
            baseline_text: None,
        });
        test.record_subtest("x", "PASS", None).unwrap();
        let result = test.finish("FAIL", None, 0).unwrap();
        assert!(!result.unexpected());
        assert!(!result.is_regression());

        let test = RunningTest::new(TestStart {
            name: "wpt_internal/b.html".to_owned(),
            test_type: TestType::Reftest,
            file_path: "wpt_internal/b.html".to_owned(),
            started: 0,
            expected: btreeset! {ResultType::Failure},
            baseline_text: None,
        });
        let result = test.finish("PASS", None, 0).unwrap();
        assert!(result.unexpected(), "unexpected pass");
        assert!(!result.is_regression());
    }

    #[test]
    fn summary_for_regression() {
        let mut test = start(TestType::Testharness, None);
        test.record_subtest("b", "FAIL", Some("x")).unwrap();
        let mut result = test.finish("OK", None, 1000).unwrap();
        let mut artifacts = ArtifactMap::new();
        artifacts.add("stderr", "layout-test-results/external/wpt/dom/a-stderr.txt");
        result.set_artifacts(artifacts, None);

        let summary = result.summary_html().unwrap();
        assert!(summary.contains(WPT_DOC_URL));
        assert!(summary.contains(
            "<a href=\"https://wpt.fyi/results/dom%2Fa.html?label=experimental&label=master&aligned\">"
        ));
        assert!(summary.contains("<text-artifact artifact-id=\"stderr\"/>"));
        assert!(!summary.contains("crash_log"));
    }

    #[test_case("external/wpt/a b/c.html?x=1", Some("a+b%2Fc.html%3Fx%3D1"); "escaped")]
    #[test_case("external/wpt/a_b-c.d~e", Some("a_b-c.d~e"); "safe characters")]
    #[test_case("wpt_internal/a.html", None; "internal")]
    fn fyi_urls(test: &str, encoded: Option<&str>) {
        assert_eq!(
            wpt_fyi_url(test),
            encoded.map(|encoded| format!("{WPT_FYI_BASE_URL}{encoded}{WPT_FYI_QUERY}"))
        );
    }
}
