// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured events emitted by the test runner, in the mozlog JSON-lines format.

use crate::errors::EventParseError;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// A single event from the runner.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The event's action, as it appeared in the stream.
    pub action: String,

    /// The event timestamp, in milliseconds since the epoch.
    pub time: i64,

    /// The name of the runner thread that produced the event.
    pub thread: Option<String>,

    /// The ID of the runner process that produced the event.
    pub pid: Option<u32>,

    /// The logger that produced the event.
    pub source: Option<String>,

    /// Action-specific fields.
    pub kind: EventKind,
}

impl Event {
    /// Parses a single JSON line.
    pub fn parse(line: &str) -> Result<Self, EventParseError> {
        let raw: RawEvent = serde_json::from_str(line).map_err(EventParseError::Json)?;
        raw.into_event()
    }

    /// Returns a synthetic `shutdown` event.
    pub fn shutdown() -> Self {
        Self::new(EventKind::Shutdown)
    }

    /// Creates an event with no metadata.
    pub fn new(kind: EventKind) -> Self {
        Self {
            action: kind.action().to_owned(),
            time: 0,
            thread: None,
            pid: None,
            source: None,
            kind,
        }
    }

    /// Sets the timestamp.
    pub fn at(mut self, time: i64) -> Self {
        self.time = time;
        self
    }
}

/// The action-specific part of an [`Event`].
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// A suite (one iteration of the run) started.
    SuiteStart {
        /// Run metadata, merged into the processor's run info.
        run_info: Map<String, Value>,
    },

    /// A test started.
    TestStart(TestStartEvent),

    /// A subtest reported a status.
    TestStatus(TestStatusEvent),

    /// A test ended.
    TestEnd(TestEndEvent),

    /// A suite ended. Later tests are retries.
    SuiteEnd,

    /// No more events will follow.
    Shutdown,

    /// A line of output from a process related to the run.
    ProcessOutput {
        /// The command that produced the output.
        command: String,

        /// The output: normally a string, but any JSON value is accepted.
        data: Value,
    },

    /// A free-form log message.
    Log,

    /// A subsuite was registered.
    AddSubsuite,

    /// An action this processor does not know about.
    Unknown {
        /// The action.
        action: String,
    },
}

impl EventKind {
    /// Returns the action name for this kind.
    pub fn action(&self) -> &str {
        match self {
            Self::SuiteStart { .. } => "suite_start",
            Self::TestStart(_) => "test_start",
            Self::TestStatus(_) => "test_status",
            Self::TestEnd(_) => "test_end",
            Self::SuiteEnd => "suite_end",
            Self::Shutdown => "shutdown",
            Self::ProcessOutput { .. } => "process_output",
            Self::Log => "log",
            Self::AddSubsuite => "add_subsuite",
            Self::Unknown { action } => action,
        }
    }

    /// Returns the test this event is about, if any.
    pub fn test(&self) -> Option<&str> {
        match self {
            Self::TestStart(start) => Some(&start.test),
            Self::TestStatus(status) => Some(&status.test),
            Self::TestEnd(end) => Some(&end.test),
            _ => None,
        }
    }
}

/// Fields of a `test_start` event.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TestStartEvent {
    /// The test identifier, relative to the WPT root.
    pub test: String,

    /// The virtual suite the test runs under, if any.
    #[serde(default)]
    pub subsuite: Option<String>,
}

/// Fields of a `test_status` event.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TestStatusEvent {
    /// The test identifier.
    pub test: String,

    /// The virtual suite the test runs under, if any.
    #[serde(default)]
    pub subsuite: Option<String>,

    /// The subtest name.
    pub subtest: String,

    /// The raw subtest status.
    pub status: String,

    /// The status the runner expected. Absent when the runner expected `status`.
    #[serde(default)]
    pub expected: Option<String>,

    /// Other statuses the runner would accept.
    #[serde(default)]
    pub known_intermittent: Vec<String>,

    /// A diagnostic message.
    #[serde(default)]
    pub message: Option<String>,
}

impl TestStatusEvent {
    /// Returns the raw statuses the runner would have accepted.
    pub fn runner_expected(&self) -> Vec<&str> {
        runner_expected(&self.status, self.expected.as_deref(), &self.known_intermittent)
    }
}

/// Fields of a `test_end` event.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TestEndEvent {
    /// The test identifier.
    pub test: String,

    /// The virtual suite the test runs under, if any.
    #[serde(default)]
    pub subsuite: Option<String>,

    /// The raw test-level status.
    pub status: String,

    /// The status the runner expected. Absent when the runner expected `status`.
    #[serde(default)]
    pub expected: Option<String>,

    /// Other statuses the runner would accept.
    #[serde(default)]
    pub known_intermittent: Vec<String>,

    /// A diagnostic message.
    #[serde(default)]
    pub message: Option<String>,

    /// Additional runner-specific data.
    #[serde(default)]
    pub extra: TestEndExtra,
}

impl TestEndEvent {
    /// Returns the raw statuses the runner would have accepted.
    pub fn runner_expected(&self) -> Vec<&str> {
        runner_expected(&self.status, self.expected.as_deref(), &self.known_intermittent)
    }
}

/// The `extra` field of a `test_end` event.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TestEndExtra {
    /// Screenshots of a reftest and its references.
    #[serde(default, deserialize_with = "null_as_default")]
    pub reftest_screenshots: Vec<ReftestScreenshot>,
}

/// An entry of `reftest_screenshots`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReftestScreenshot {
    /// A base64-encoded PNG screenshot of the page at `url`.
    Image {
        /// The URL of the screenshotted page, with a leading `/`.
        url: String,

        /// The base64-encoded PNG.
        screenshot: String,
    },

    /// The relation between two screenshots, like `==` or `!=`.
    Relation(String),
}

fn runner_expected<'a>(
    status: &'a str,
    expected: Option<&'a str>,
    known_intermittent: &'a [String],
) -> Vec<&'a str> {
    std::iter::once(expected.unwrap_or(status))
        .chain(known_intermittent.iter().map(String::as_str))
        .collect()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
struct RawEvent {
    action: String,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    thread: Option<String>,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    source: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct SuiteStartFields {
    #[serde(default, deserialize_with = "null_as_default")]
    run_info: Map<String, Value>,
}

#[derive(Deserialize)]
struct ProcessOutputFields {
    #[serde(default)]
    command: String,
    #[serde(default)]
    data: Value,
}

impl RawEvent {
    fn into_event(self) -> Result<Event, EventParseError> {
        let Self {
            action,
            time,
            thread,
            pid,
            source,
            fields,
        } = self;

        let kind = match action.as_str() {
            "suite_start" => {
                let SuiteStartFields { run_info } = parse_fields(&action, fields)?;
                EventKind::SuiteStart { run_info }
            }
            "test_start" => EventKind::TestStart(parse_fields(&action, fields)?),
            "test_status" => EventKind::TestStatus(parse_fields(&action, fields)?),
            "test_end" => EventKind::TestEnd(parse_fields(&action, fields)?),
            "suite_end" => EventKind::SuiteEnd,
            "shutdown" => EventKind::Shutdown,
            "process_output" => {
                let ProcessOutputFields { command, data } = parse_fields(&action, fields)?;
                EventKind::ProcessOutput { command, data }
            }
            "log" => EventKind::Log,
            "add_subsuite" => EventKind::AddSubsuite,
            _ => EventKind::Unknown {
                action: action.clone(),
            },
        };

        Ok(Event {
            action,
            time,
            thread,
            pid,
            source,
            kind,
        })
    }
}

fn parse_fields<T: DeserializeOwned>(
    action: &str,
    fields: Map<String, Value>,
) -> Result<T, EventParseError> {
    serde_json::from_value(Value::Object(fields)).map_err(|error| EventParseError::Fields {
        action: action.to_owned(),
        error,
    })
}
