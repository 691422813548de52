// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the WPT results processor.

use crate::status::{RunnerStatus, TestType};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{error::Error as StdError, fmt, io, time::Duration};
use thiserror::Error;

/// A raw status string outside the known runner status vocabulary.
///
/// This indicates that the runner and the processor disagree about the status vocabulary, and is
/// fatal to the results stream.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "unknown test status `{status}` (known statuses: {})",
    RunnerStatus::ALL.iter().map(|status| status.as_str()).join(", "),
)]
pub struct UnknownStatusError {
    status: String,
}

impl UnknownStatusError {
    pub(crate) fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }

    /// Returns the status string that was not recognized.
    pub fn status(&self) -> &str {
        &self.status
    }
}

/// Subtest statuses were requested for a test type that cannot have subtests.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("{test_type} tests do not have subtests")]
pub struct NoSubtestsError {
    test_type: TestType,
}

impl NoSubtestsError {
    pub(crate) fn new(test_type: TestType) -> Self {
        Self { test_type }
    }

    /// Returns the test type that was queried.
    pub fn test_type(&self) -> TestType {
        self.test_type
    }
}

/// An error that occurred while parsing a test type.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized test type: {input}\n(known values: {})",
    TestType::ALL.iter().map(|test_type| test_type.as_str()).join(", "),
)]
pub struct TestTypeParseError {
    input: String,
}

impl TestTypeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// A baseline file could not be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid baseline at line {line}")]
pub struct BaselineParseError {
    line: usize,
    #[source]
    kind: BaselineParseErrorKind,
}

impl BaselineParseError {
    pub(crate) fn new(line: usize, kind: BaselineParseErrorKind) -> Self {
        Self { line, kind }
    }

    /// The 1-based line number the error was found at.
    pub fn line(&self) -> usize {
        self.line
    }

    /// The kind of error.
    pub fn kind(&self) -> &BaselineParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a baseline.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BaselineParseErrorKind {
    /// The first line is not a recognized header.
    #[error("missing or unrecognized header")]
    MissingHeader,

    /// The last line is not the footer.
    #[error("missing footer")]
    MissingFooter,

    /// A line matched none of the known line forms.
    #[error("unrecognized line {0:?}")]
    UnexpectedLine(String),

    /// An indented message line appeared before any subtest or harness error line.
    #[error("message line without a preceding subtest or harness error")]
    OrphanMessage,

    /// A status in a status list was not recognized.
    #[error("unknown baseline status `{0}`")]
    UnknownStatus(String),

    /// A status list was empty.
    #[error("empty status list")]
    EmptyStatuses,

    /// A subtest name appeared twice.
    #[error("duplicate subtest `{0}`")]
    DuplicateSubtest(String),

    /// More than one harness error line was present.
    #[error("more than one harness error line")]
    MultipleHarnessErrors,
}

/// An event was inconsistent with the current state of the run.
///
/// These errors are confined to the event that caused them: the event is dropped and processing
/// continues.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EventProcessingError {
    /// A `test_status` or `test_end` event arrived for a test that was not started.
    #[error("test `{test}` was not started")]
    NotStarted {
        /// The test name.
        test: String,
    },

    /// A `test_start` event arrived for a test that is already running.
    #[error("test `{test}` was already started")]
    AlreadyStarted {
        /// The test name.
        test: String,
    },

    /// A subtest reported more than one status in the same attempt.
    #[error("subtest `{subtest}` of test `{test}` already reported a status")]
    DuplicateSubtest {
        /// The test name.
        test: String,

        /// The subtest name.
        subtest: String,
    },

    /// A test could not be found in the configured WPT manifests.
    #[error("test `{test}` not found in the WPT manifest")]
    NotInManifest {
        /// The test name.
        test: String,
    },
}

/// An error returned by [`ResultsProcessor::process_event`](crate::processor::ResultsProcessor::process_event).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProcessEventError {
    /// The event could not be processed, but the stream can continue.
    #[error(transparent)]
    Processing(#[from] EventProcessingError),

    /// The stream cannot continue.
    #[error("fatal error processing event")]
    Fatal(#[from] UnknownStatusError),
}

/// An error that occurred while parsing a line of the event stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EventParseError {
    /// The line was not a valid JSON object.
    #[error("event is not valid JSON")]
    Json(#[source] serde_json::Error),

    /// The line was a JSON object, but its fields did not match its action.
    #[error("malformed `{action}` event")]
    Fields {
        /// The event's action.
        action: String,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred while shutting down the results stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The consumer did not drain the queue within the shutdown timeout.
    #[error("results stream did not shut down within {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The consumer thread panicked.
    #[error("results stream consumer panicked")]
    ConsumerPanicked(#[source] tokio::task::JoinError),

    /// The consumer stopped because of a fatal error.
    #[error("results stream stopped")]
    Fatal(#[source] UnknownStatusError),
}

/// An error that occurred while parsing an abort threshold.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid threshold `{input}`: {reason}")]
pub struct ThresholdParseError {
    input: String,
    reason: &'static str,
}

impl ThresholdParseError {
    pub(crate) fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self {
            input: input.into(),
            reason,
        }
    }
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse wpt-results config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing the config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The layered config could not be built.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// The layered config did not match the expected shape.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error that occurred while loading a WPT manifest.
#[derive(Debug, Error)]
#[error("failed to load WPT manifest at `{path}`")]
pub struct ManifestLoadError {
    path: Utf8PathBuf,
    #[source]
    kind: ManifestLoadErrorKind,
}

impl ManifestLoadError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: ManifestLoadErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ManifestLoadErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while loading a WPT manifest.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestLoadErrorKind {
    /// The manifest could not be read.
    #[error("error reading manifest")]
    Read(#[source] io::Error),

    /// The manifest was not valid JSON, or did not have the expected shape.
    #[error("error parsing manifest")]
    Parse(#[source] serde_json::Error),

    /// The manifest version is not supported.
    #[error("unsupported manifest version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// The version found.
        found: u64,

        /// The supported version.
        supported: u64,
    },
}

/// An error that occurred while parsing a TestExpectations file.
#[derive(Debug, Error)]
#[error("failed to parse expectations at `{path}`")]
pub struct ExpectationsParseError {
    path: Utf8PathBuf,
    #[source]
    kind: ExpectationsParseErrorKind,
}

impl ExpectationsParseError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: ExpectationsParseErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ExpectationsParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a TestExpectations file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExpectationsParseErrorKind {
    /// The file could not be read.
    #[error("error reading file")]
    Read(#[source] io::Error),

    /// A line could not be parsed.
    #[error("line {line}: {message}")]
    InvalidLine {
        /// The 1-based line number.
        line: usize,

        /// A description of the problem.
        message: String,
    },
}

/// An error that occurred while building a [`ResultsProcessor`](crate::processor::ResultsProcessor).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessorBuildError {
    /// A manifest could not be loaded.
    #[error(transparent)]
    Manifest(#[from] ManifestLoadError),

    /// A TestExpectations file could not be parsed.
    #[error(transparent)]
    Expectations(#[from] ExpectationsParseError),
}

/// An error that occurred while writing an artifact.
#[derive(Debug, Error)]
#[error("error writing artifact to `{path}`")]
pub struct ArtifactWriteError {
    path: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl ArtifactWriteError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// An error that occurred while comparing two images.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImageDiffError {
    /// An image could not be decoded.
    #[error("error decoding {which} image")]
    Decode {
        /// Which image failed to decode: "expected" or "actual".
        which: &'static str,

        /// The underlying error.
        #[source]
        error: image::ImageError,
    },

    /// The images have different dimensions.
    #[error(
        "image dimensions differ: expected {}x{}, actual {}x{}",
        .expected.0, .expected.1, .actual.0, .actual.1,
    )]
    DimensionMismatch {
        /// The dimensions of the expected image.
        expected: (u32, u32),

        /// The dimensions of the actual image.
        actual: (u32, u32),
    },

    /// The diff image could not be encoded.
    #[error("error encoding diff image")]
    Encode(#[source] image::ImageError),
}

/// An error that occurred while writing report files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// The report could not be serialized.
    #[error("error serializing report")]
    Serialize(#[source] serde_json::Error),

    /// A report file could not be written.
    #[error("error writing report to `{path}`")]
    Write {
        /// The path being written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },

    /// A directory could not be created.
    #[error("error creating directory `{path}`")]
    CreateDir {
        /// The directory being created.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while merging a wptreport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WptReportMergeError {
    /// The report could not be read.
    #[error("error reading wptreport `{path}`")]
    Read {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The report was empty.
    #[error("wptreport `{path}` is empty")]
    Empty {
        /// The report path.
        path: Utf8PathBuf,
    },

    /// A line of the report was not a JSON object.
    #[error("wptreport `{path}` line {line} is not a JSON object")]
    Parse {
        /// The report path.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line: usize,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The merged report could not be written.
    #[error(transparent)]
    Write(#[from] WriteReportError),
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: StdError> DisplayErrorChain<E> {
    /// Wraps `error`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: StdError> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(error) = source {
            write!(f, "\n  - {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
