// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event-driven results processor.
//!
//! [`ResultsProcessor`] consumes runner events one at a time, in order. It owns every in-flight
//! test, and hands each finished attempt to the artifact extractor, the result sink and the
//! results history.

use crate::{
    artifacts::{ArtifactExtractor, ArtifactStore},
    config::WptResultsConfig,
    errors::{EventProcessingError, ProcessEventError, ProcessorBuildError},
    events::{Event, EventKind, TestEndEvent, TestStartEvent, TestStatusEvent},
    expectations::TestExpectations,
    manifest::WptManifest,
    report::{ReportContext, ResultsHistory, build_full_results},
    result::{RunningTest, TestStart},
    sink::{ResultSink, SinkTestResult},
    status::{Granularity, RunnerStatus, TestType, runner_statuses},
    threshold::{AbortThresholds, ThresholdExceeded},
    web_tests::{
        WPT_INTERNAL_PREFIX, WPT_PREFIX, WebTestsLayout, chromium_test_name, split_virtual,
    },
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use debug_ignore::DebugIgnore;
use itertools::Itertools;
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};
use wpt_results_metadata::{FullResults, ResultType};

/// What the caller should do after an event was processed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventResponse {
    /// Keep sending events.
    Continue,

    /// The stream has ended; no more events will be processed.
    Shutdown,

    /// An abort threshold was exceeded: the run should stop as soon as possible.
    ThresholdExceeded(ThresholdExceeded),
}

/// Resolves test types and source files from the WPT manifests.
#[derive(Clone, Debug)]
struct TestLookup {
    wpt: Option<WptManifest>,
    internal: Option<WptManifest>,
    default_test_type: TestType,
}

impl TestLookup {
    fn resolve(&self, test: &str) -> Result<(TestType, String), EventProcessingError> {
        let (_, base) = split_virtual(test);
        let (manifest, prefix, url) = match base.strip_prefix(WPT_INTERNAL_PREFIX) {
            Some(url) => (&self.internal, WPT_INTERNAL_PREFIX, url),
            None => (
                &self.wpt,
                WPT_PREFIX,
                base.strip_prefix(WPT_PREFIX).unwrap_or(base),
            ),
        };

        match manifest {
            Some(manifest) => manifest
                .get(url)
                .map(|entry| (entry.test_type, format!("{prefix}{}", entry.path)))
                .ok_or_else(|| EventProcessingError::NotInManifest {
                    test: base.to_owned(),
                }),
            None => {
                let file_path = base.split(['?', '#']).next().unwrap_or(base);
                Ok((self.default_test_type, file_path.to_owned()))
            }
        }
    }
}

/// Mutable state for the run, owned by the single consumer.
#[derive(Debug, Default)]
struct RunState {
    iteration: usize,
    run_info: Map<String, Value>,
    running: BTreeMap<String, RunningTest>,
    crash_log: Vec<String>,
    num_failures_by_type: BTreeMap<ResultType, usize>,
    thresholds: AbortThresholds,
}

impl RunState {
    fn used_upstream(&self) -> bool {
        self.run_info
            .get("used_upstream")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Turns runner events into test results.
#[derive(Debug)]
pub struct ResultsProcessor {
    extractor: ArtifactExtractor,
    layout: WebTestsLayout,
    lookup: TestLookup,
    expectations: TestExpectations,
    sink: DebugIgnore<Box<dyn ResultSink>>,
    test_name_prefix: String,
    crash_log_executables: Vec<String>,
    shard_index: Option<usize>,
    flag_name: Option<String>,
    state: RunState,
    history: ResultsHistory,
}

impl ResultsProcessor {
    /// Creates a processor, loading the manifests and expectations named in `config`.
    pub fn new(
        config: &WptResultsConfig,
        sink: Box<dyn ResultSink>,
    ) -> Result<Self, ProcessorBuildError> {
        let web_tests = &config.web_tests;
        let load_manifest = |path: &Option<Utf8PathBuf>| {
            path.as_deref()
                .map(|path| WptManifest::load(&web_tests.resolve(path)))
                .transpose()
        };
        let lookup = TestLookup {
            wpt: load_manifest(&web_tests.wpt_manifest)?,
            internal: load_manifest(&web_tests.internal_manifest)?,
            default_test_type: web_tests.default_test_type,
        };

        let mut expectations = TestExpectations::new();
        for path in &web_tests.expectations_files {
            expectations.load(&web_tests.resolve(path), &web_tests.platform_tags)?;
        }

        let processor = &config.processor;
        let layout = WebTestsLayout::new(&web_tests.dir, &web_tests.baseline_search_path);
        let mut test_name_prefix = processor.test_name_prefix.clone();
        if !test_name_prefix.is_empty() && !test_name_prefix.ends_with('/') {
            test_name_prefix.push('/');
        }

        Ok(Self {
            extractor: ArtifactExtractor::new(
                ArtifactStore::new(&processor.artifacts_dir),
                layout.clone(),
                processor.reset_results,
            ),
            layout,
            lookup,
            expectations,
            sink: DebugIgnore(sink),
            test_name_prefix,
            crash_log_executables: processor.crash_log_executables.clone(),
            shard_index: config.report.shard_index,
            flag_name: config.report.flag_name.clone(),
            state: RunState {
                thresholds: AbortThresholds::new(
                    processor.failure_threshold,
                    processor.crash_timeout_threshold,
                ),
                ..Default::default()
            },
            history: ResultsHistory::new(),
        })
    }

    /// Processes a single event.
    ///
    /// A [`ProcessEventError::Processing`] error only affects this event; later events can still
    /// be processed. A [`ProcessEventError::Fatal`] error means the stream cannot continue.
    pub fn process_event(&mut self, event: Event) -> Result<EventResponse, ProcessEventError> {
        let is_test_event = matches!(
            event.kind,
            EventKind::TestStart(_) | EventKind::TestStatus(_) | EventKind::TestEnd(_)
        );
        // With upstream WPT, only the wptreport is wanted.
        if is_test_event && self.state.used_upstream() {
            return Ok(EventResponse::Continue);
        }

        match event.kind {
            EventKind::SuiteStart { run_info } => {
                self.state.run_info.extend(run_info);
            }
            EventKind::TestStart(start) => self.test_start(event.time, start)?,
            EventKind::TestStatus(status) => self.test_status(status)?,
            EventKind::TestEnd(end) => return self.test_end(event.time, end),
            EventKind::SuiteEnd => {
                self.state.iteration += 1;
            }
            EventKind::Shutdown => {
                self.shutdown();
                return Ok(EventResponse::Shutdown);
            }
            EventKind::ProcessOutput { command, data } => self.process_output(&command, data),
            EventKind::Log | EventKind::AddSubsuite => {}
            EventKind::Unknown { action } => {
                warn!(
                    "`{action}` event received, but not handled (time: {}, thread: {:?}, pid: {:?}, source: {:?})",
                    event.time, event.thread, event.pid, event.source,
                );
            }
        }
        Ok(EventResponse::Continue)
    }

    fn test_start(&mut self, time: i64, event: TestStartEvent) -> Result<(), EventProcessingError> {
        let name = chromium_test_name(&event.test, event.subsuite.as_deref());
        if self.state.running.contains_key(&name) {
            return Err(EventProcessingError::AlreadyStarted { test: name });
        }

        let (test_type, file_path) = self.lookup.resolve(&name)?;
        let expectation = self.expectations.get(&name);
        if expectation.is_slow {
            self.history.mark_slow(&name);
        }
        let baseline_text = if test_type.can_have_subtests() {
            self.layout.expected_text(&name)
        } else {
            None
        };

        let test = RunningTest::new(TestStart {
            name: name.clone(),
            test_type,
            file_path,
            started: time,
            expected: expectation.expected,
            baseline_text,
        });
        self.state.running.insert(name, test);
        Ok(())
    }

    fn test_status(&mut self, event: TestStatusEvent) -> Result<(), EventProcessingError> {
        let name = chromium_test_name(&event.test, event.subsuite.as_deref());
        let test = self
            .state
            .running
            .get_mut(&name)
            .ok_or(EventProcessingError::NotStarted { test: name })?;
        check_runner_expectation(test, Granularity::Subtest, &event.runner_expected());
        test.record_subtest(&event.subtest, &event.status, event.message.as_deref())
    }

    fn test_end(
        &mut self,
        time: i64,
        event: TestEndEvent,
    ) -> Result<EventResponse, ProcessEventError> {
        let name = chromium_test_name(&event.test, event.subsuite.as_deref());
        let test = self
            .state
            .running
            .remove(&name)
            .ok_or(EventProcessingError::NotStarted { test: name })?;
        check_runner_expectation(&test, Granularity::Test, &event.runner_expected());

        let mut result = test.finish(&event.status, event.message.as_deref(), time)?;
        let iteration = self.state.iteration;
        self.extractor.extract(
            &mut result,
            iteration,
            &event.extra.reftest_screenshots,
            &mut self.state.crash_log,
        );

        let mut response = EventResponse::Continue;
        if result.unexpected()
            && let Some(exceeded) = self.state.thresholds.record_unexpected(result.actual())
        {
            error!("exiting early after exceeding threshold for unexpected {exceeded}");
            response = EventResponse::ThresholdExceeded(exceeded);
        }

        let html_summary = result.summary_html();
        self.sink.report_test_result(&SinkTestResult {
            test_name_prefix: &self.test_name_prefix,
            result: &result,
            artifact_output_dir: self.extractor.store().output_root(),
            html_summary: html_summary.as_deref(),
        });

        let artifacts = result.record().artifacts.iter().map(|(id, _)| id).join(", ");
        debug!(
            "reported result for {}, iteration {iteration} (actual: {}, expected: {}, artifacts: {})",
            result.name(),
            result.actual(),
            result.record().expected.iter().join(", "),
            if artifacts.is_empty() { "<none>" } else { &artifacts },
        );

        if iteration == 0 {
            *self
                .state
                .num_failures_by_type
                .entry(result.actual())
                .or_default() += 1;
        }
        self.history.push(result);
        Ok(response)
    }

    fn shutdown(&mut self) {
        if !self.state.running.is_empty() {
            warn!(
                "some tests have unreported results:\n  {}",
                self.state.running.keys().join("\n  "),
            );
        }
        info!("stopping results stream");
    }

    fn process_output(&mut self, command: &str, data: Value) {
        if !self
            .crash_log_executables
            .iter()
            .any(|executable| command.contains(executable.as_str()))
        {
            return;
        }
        let mut line = match data {
            Value::String(line) => line,
            other => match serde_json::to_string(&SortedKeys(&other)) {
                Ok(line) => line,
                Err(error) => {
                    warn!("failed to serialize output from `{command}`: {error}");
                    return;
                }
            },
        };
        line.push('\n');
        self.state.crash_log.push(line);
    }

    /// Returns the result sink, for reporting run-level artifacts.
    pub fn sink_mut(&mut self) -> &mut dyn ResultSink {
        &mut **self.sink
    }

    /// Returns the current iteration. Each `suite_end` event starts a new iteration.
    pub fn iteration(&self) -> usize {
        self.state.iteration
    }

    /// Returns the run info accumulated from `suite_start` events.
    pub fn run_info(&self) -> &Map<String, Value> {
        &self.state.run_info
    }

    /// Returns the names of tests that have started but not ended.
    pub fn running_tests(&self) -> impl Iterator<Item = &str> {
        self.state.running.keys().map(String::as_str)
    }

    /// Returns result type counts from the first iteration.
    pub fn num_failures_by_type(&self) -> &BTreeMap<ResultType, usize> {
        &self.state.num_failures_by_type
    }

    /// Returns the number of first-iteration results that were failures, crashes or timeouts.
    pub fn num_initial_failures(&self) -> usize {
        [ResultType::Failure, ResultType::Crash, ResultType::Timeout]
            .iter()
            .filter_map(|result| self.state.num_failures_by_type.get(result))
            .sum()
    }

    /// Returns the number of tests whose last attempt was a regression.
    pub fn num_regressions(&self) -> usize {
        self.history.num_regressions()
    }

    /// Returns the exhausted abort threshold, if any.
    pub fn threshold_exceeded(&self) -> Option<ThresholdExceeded> {
        self.state.thresholds.exceeded()
    }

    /// Returns the results history.
    pub fn history(&self) -> &ResultsHistory {
        &self.history
    }

    /// Returns the artifacts directory.
    pub fn artifacts_dir(&self) -> &Utf8Path {
        self.extractor.store().artifacts_dir()
    }

    /// Builds the final report.
    pub fn full_results(&self, interrupted: bool, now: DateTime<Utc>) -> FullResults {
        build_full_results(
            &self.history,
            &ReportContext {
                num_failures_by_type: &self.state.num_failures_by_type,
                interrupted,
                seconds_since_epoch: now.timestamp(),
                layout_tests_dir: self.layout.web_tests_dir(),
                flag_name: self.flag_name.as_deref(),
                shard_index: self.shard_index,
            },
        )
    }
}

// The runner's own expectation is informational: the declared expectations decide whether a
// result is unexpected.
fn check_runner_expectation(test: &RunningTest, granularity: Granularity, runner_expected: &[&str]) {
    let Ok(allowed) = runner_statuses(test.expected(), test.test_type(), granularity) else {
        return;
    };
    let disagreements: BTreeSet<&str> = runner_expected
        .iter()
        .copied()
        .filter(|status| {
            status
                .parse::<RunnerStatus>()
                .is_ok_and(|status| !allowed.contains(&status))
        })
        .collect();
    if !disagreements.is_empty() {
        debug!(
            "{}: runner expected {} but expectations allow {}",
            test.name(),
            disagreements.iter().join(" "),
            allowed.iter().join(" "),
        );
    }
}

/// Serializes JSON objects with their keys sorted, whatever order the map keeps them in.
struct SortedKeys<'a>(&'a Value);

impl Serialize for SortedKeys<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let entries: BTreeMap<&String, &Value> = map.iter().collect();
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &SortedKeys(value))?;
                }
                out.end()
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(SortedKeys)),
            other => other.serialize(serializer),
        }
    }
}
