// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test reporting to an external results service.
//!
//! Reporting is fire-and-forget: sinks log their own I/O errors and never fail the run.

use crate::result::WptResult;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter, Write},
};
use tracing::warn;
use wpt_results_metadata::ResultType;

const WEB_TESTS_LOCATION: &str = "//third_party/blink/web_tests/";

/// A finished test attempt, as reported to a sink.
#[derive(Clone, Copy, Debug)]
pub struct SinkTestResult<'a> {
    /// Prepended to the test name to form the test ID.
    pub test_name_prefix: &'a str,

    /// The result.
    pub result: &'a WptResult,

    /// The directory that the result's artifact paths are relative to.
    pub artifact_output_dir: &'a Utf8Path,

    /// An HTML summary, for regressions.
    pub html_summary: Option<&'a str>,
}

/// An artifact that belongs to the whole run rather than to a test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InvocationArtifact {
    /// The artifact's location on disk.
    #[serde(rename = "filePath")]
    pub file_path: Utf8PathBuf,
}

/// Receives results as they are produced.
pub trait ResultSink: Send {
    /// Reports one test attempt.
    fn report_test_result(&mut self, result: &SinkTestResult<'_>);

    /// Reports run-level artifacts, keyed by artifact ID.
    fn report_invocation_artifacts(&mut self, artifacts: &BTreeMap<String, InvocationArtifact>);
}

/// A sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl ResultSink for NoopSink {
    fn report_test_result(&mut self, _result: &SinkTestResult<'_>) {}

    fn report_invocation_artifacts(&mut self, _artifacts: &BTreeMap<String, InvocationArtifact>) {}
}

/// A sink that writes one JSON record per line.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl JsonLinesSink<BufWriter<File>> {
    /// Creates a sink writing to a new file at `path`.
    pub fn create(path: &Utf8Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Creates a sink writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn report_test_result(&mut self, result: &SinkTestResult<'_>) {
        let record = TestResultRecord::new(result);
        if let Err(error) = self.write_record(&TestResultEnvelope {
            test_result: record,
        }) {
            warn!("failed to report result for {}: {error}", result.result.name());
        }
    }

    fn report_invocation_artifacts(&mut self, artifacts: &BTreeMap<String, InvocationArtifact>) {
        if let Err(error) = self.write_record(&InvocationArtifactsEnvelope { artifacts }) {
            warn!("failed to report invocation artifacts: {error}");
        }
    }
}

/// The status vocabulary of the results service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SinkStatus {
    /// The test passed.
    Pass,
    /// The test failed.
    Fail,
    /// The test crashed.
    Crash,
    /// The test was aborted, for example by a timeout.
    Abort,
    /// The test was skipped.
    Skip,
}

impl From<ResultType> for SinkStatus {
    fn from(result: ResultType) -> Self {
        match result {
            ResultType::Pass => Self::Pass,
            ResultType::Failure => Self::Fail,
            ResultType::Crash => Self::Crash,
            ResultType::Timeout => Self::Abort,
            ResultType::Skip => Self::Skip,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestResultEnvelope<'a> {
    test_result: TestResultRecord<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationArtifactsEnvelope<'a> {
    artifacts: &'a BTreeMap<String, InvocationArtifact>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TestResultRecord<'a> {
    test_id: String,
    status: SinkStatus,
    expected: bool,
    duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary_html: Option<&'a str>,
    artifacts: BTreeMap<String, InvocationArtifact>,
    tags: Vec<Tag<'a>>,
    test_metadata: TestMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct Tag<'a> {
    key: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TestMetadata<'a> {
    name: &'a str,
    location: TestLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TestLocation {
    file_name: String,
}

impl<'a> TestResultRecord<'a> {
    fn new(sink_result: &SinkTestResult<'a>) -> Self {
        let result = sink_result.result;
        let record = result.record();

        // Artifact IDs must be unique, so retried paths of the same kind are numbered.
        let mut artifacts = BTreeMap::new();
        for (id, paths) in record.artifacts.iter() {
            for (index, path) in paths.iter().enumerate() {
                let key = if index == 0 {
                    id.to_owned()
                } else {
                    format!("{id}-{index}")
                };
                artifacts.insert(
                    key,
                    InvocationArtifact {
                        file_path: sink_result.artifact_output_dir.join(path),
                    },
                );
            }
        }

        Self {
            test_id: format!("{}{}", sink_result.test_name_prefix, result.name()),
            status: record.actual.into(),
            expected: !record.unexpected,
            duration: format!("{:.3}s", record.took.as_secs_f64()),
            summary_html: sink_result.html_summary,
            artifacts,
            tags: vec![
                Tag {
                    key: "test_name",
                    value: result.name(),
                },
                Tag {
                    key: "web_tests_test_type",
                    value: result.wpt().test_type.as_str(),
                },
            ],
            test_metadata: TestMetadata {
                name: result.name(),
                location: TestLocation {
                    file_name: format!("{WEB_TESTS_LOCATION}{}", result.wpt().file_path),
                },
            },
        }
    }
}
