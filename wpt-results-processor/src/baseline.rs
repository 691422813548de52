// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The text baseline format for harness-based tests.
//!
//! A baseline records the expected status (or set of statuses, for flaky subtests) of every
//! subtest that is not expected to pass, plus an optional harness error:
//!
//! ```text
//! This is a testharness.js-based test.
//! Harness Error. [TIMEOUT]
//! [FAIL] subtest name
//!   assert_equals: expected 1 but got 2
//! [FAIL PASS] flaky subtest
//! Harness: the test ran to completion.
//! ```
//!
//! A test whose subtests all pass has either no baseline at all, or a baseline consisting of
//! [`ALL_PASS_MARKER`].

use crate::{
    errors::{BaselineParseError, BaselineParseErrorKind},
    status::{BaselineStatus, TestType},
};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::BTreeSet;
use swrite::{SWrite, swriteln};

/// The header of a testharness.js baseline.
pub const TESTHARNESS_HEADER: &str = "This is a testharness.js-based test.";

/// The header of a wdspec baseline.
pub const WDSPEC_HEADER: &str = "This is a wdspec test.";

/// The last line of every non-abbreviated baseline.
pub const FOOTER: &str = "Harness: the test ran to completion.";

/// A single-line baseline standing in for "every subtest passes".
pub const ALL_PASS_MARKER: &str = "All subtests passed and are omitted for brevity.";

const HARNESS_ERROR_PREFIX: &str = "Harness Error. [";
const MESSAGE_INDENT: &str = "  ";

/// The header kind of a baseline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BaselineHeader {
    /// [`TESTHARNESS_HEADER`]
    Testharness,
    /// [`WDSPEC_HEADER`]
    Wdspec,
}

impl BaselineHeader {
    /// Returns the header used for baselines of the given test type.
    pub fn for_test_type(test_type: TestType) -> Self {
        match test_type {
            TestType::Wdspec => BaselineHeader::Wdspec,
            _ => BaselineHeader::Testharness,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            BaselineHeader::Testharness => TESTHARNESS_HEADER,
            BaselineHeader::Wdspec => WDSPEC_HEADER,
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        match line.trim_end() {
            TESTHARNESS_HEADER => Some(BaselineHeader::Testharness),
            WDSPEC_HEADER => Some(BaselineHeader::Wdspec),
            _ => None,
        }
    }
}

/// The statuses and message recorded for a subtest or a harness error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outcome {
    /// The allowed statuses. Observed outcomes have exactly one.
    pub statuses: BTreeSet<BaselineStatus>,

    /// The diagnostic message, if any.
    pub message: Option<String>,
}

impl Outcome {
    /// Creates a new outcome with a single status.
    pub fn new(status: BaselineStatus, message: Option<String>) -> Self {
        Self {
            statuses: BTreeSet::from([status]),
            message,
        }
    }

    fn is_pass(&self) -> bool {
        self.statuses.iter().all(|status| *status == BaselineStatus::Pass)
    }

    fn write_to(&self, out: &mut String) {
        out.push_str(&self.statuses.iter().join(" "));
    }

    fn write_message(&self, out: &mut String) {
        if let Some(message) = &self.message {
            for line in message.split('\n') {
                swriteln!(out, "{MESSAGE_INDENT}{line}");
            }
        }
    }
}

/// An ordered collection of subtest outcomes plus an optional harness error.
///
/// This is used both for expected outcomes parsed from a baseline and for outcomes observed
/// while a test runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Outcomes {
    harness_error: Option<Outcome>,
    subtests: IndexMap<String, Outcome>,
}

impl Outcomes {
    /// Creates an empty set of outcomes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the harness error outcome, if any.
    pub fn harness_error(&self) -> Option<&Outcome> {
        self.harness_error.as_ref()
    }

    /// Returns subtest outcomes in the order they were recorded.
    pub fn subtests(&self) -> &IndexMap<String, Outcome> {
        &self.subtests
    }

    /// Returns true if there are no outcomes at all.
    pub fn is_empty(&self) -> bool {
        self.harness_error.is_none() && self.subtests.is_empty()
    }

    /// Records a subtest outcome. Returns false, leaving the existing outcome in place, if the
    /// subtest was already recorded.
    pub fn insert_subtest(&mut self, name: impl Into<String>, outcome: Outcome) -> bool {
        match self.subtests.entry(name.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(outcome);
                true
            }
        }
    }

    /// Sets the harness error outcome, replacing any existing one.
    pub fn set_harness_error(&mut self, outcome: Outcome) {
        self.harness_error = Some(outcome);
    }

    /// Returns true if every recorded status is `PASS`.
    pub fn is_all_pass(&self) -> bool {
        self.harness_error.iter().all(Outcome::is_pass)
            && self.subtests.values().all(Outcome::is_pass)
    }

    /// Renders these outcomes as baseline text.
    ///
    /// If every status is `PASS`, the result is the abbreviated [`ALL_PASS_MARKER`].
    pub fn format(&self, header: BaselineHeader) -> String {
        let mut out = String::new();
        if self.is_all_pass() {
            swriteln!(out, "{ALL_PASS_MARKER}");
            return out;
        }

        swriteln!(out, "{}", header.as_str());
        if let Some(harness_error) = &self.harness_error {
            out.push_str(HARNESS_ERROR_PREFIX);
            harness_error.write_to(&mut out);
            out.push_str("]\n");
            harness_error.write_message(&mut out);
        }
        for (name, outcome) in &self.subtests {
            out.push('[');
            outcome.write_to(&mut out);
            swriteln!(out, "] {name}");
            outcome.write_message(&mut out);
        }
        swriteln!(out, "{FOOTER}");
        out
    }
}

/// Renders observed outcomes for a test of the given type as baseline text.
pub fn format_baseline(test_type: TestType, outcomes: &Outcomes) -> String {
    outcomes.format(BaselineHeader::for_test_type(test_type))
}

/// A parsed baseline.
///
/// The default baseline is empty: every subtest is expected to pass, with no harness error.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Baseline {
    header: Option<BaselineHeader>,
    outcomes: Outcomes,
}

impl Baseline {
    /// Parses baseline text.
    pub fn parse(text: &str) -> Result<Self, BaselineParseError> {
        // Blank lines carry no information. Indented message lines are never blank since they
        // start with the indent.
        let lines: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line))
            .filter(|(_, line)| !line.is_empty())
            .collect();

        if let [(_, only)] = lines.as_slice()
            && only.trim() == ALL_PASS_MARKER
        {
            return Ok(Self::default());
        }

        let Some(((header_line_no, header_line), rest)) = lines.split_first() else {
            return Err(BaselineParseError::new(1, BaselineParseErrorKind::MissingHeader));
        };
        let header = BaselineHeader::from_line(header_line).ok_or_else(|| {
            BaselineParseError::new(*header_line_no, BaselineParseErrorKind::MissingHeader)
        })?;

        let Some(((footer_line_no, footer_line), body)) = rest.split_last() else {
            return Err(BaselineParseError::new(
                *header_line_no,
                BaselineParseErrorKind::MissingFooter,
            ));
        };
        if footer_line.trim_end() != FOOTER {
            return Err(BaselineParseError::new(
                *footer_line_no,
                BaselineParseErrorKind::MissingFooter,
            ));
        }

        let mut outcomes = Outcomes::new();
        let mut current: Option<Target> = None;
        for &(line_no, line) in body {
            let error = |kind| BaselineParseError::new(line_no, kind);

            if let Some(content) = line.strip_prefix(MESSAGE_INDENT) {
                let outcome = match &current {
                    Some(Target::HarnessError) => outcomes.harness_error.as_mut(),
                    Some(Target::Subtest(name)) => outcomes.subtests.get_mut(name),
                    None => None,
                };
                let outcome = outcome.ok_or_else(|| error(BaselineParseErrorKind::OrphanMessage))?;
                match &mut outcome.message {
                    Some(message) => {
                        message.push('\n');
                        message.push_str(content);
                    }
                    None => outcome.message = Some(content.to_owned()),
                }
            } else if let Some(rest) = line.strip_prefix(HARNESS_ERROR_PREFIX) {
                let statuses = rest
                    .trim_end()
                    .strip_suffix(']')
                    .ok_or_else(|| error(BaselineParseErrorKind::UnexpectedLine(line.to_owned())))?;
                let statuses = parse_statuses(statuses).map_err(error)?;
                if outcomes.harness_error.is_some() {
                    return Err(error(BaselineParseErrorKind::MultipleHarnessErrors));
                }
                outcomes.harness_error = Some(Outcome {
                    statuses,
                    message: None,
                });
                current = Some(Target::HarnessError);
            } else if let Some(rest) = line.strip_prefix('[') {
                let (statuses, name) = rest
                    .split_once("] ")
                    .ok_or_else(|| error(BaselineParseErrorKind::UnexpectedLine(line.to_owned())))?;
                let statuses = parse_statuses(statuses).map_err(error)?;
                let outcome = Outcome {
                    statuses,
                    message: None,
                };
                if !outcomes.insert_subtest(name, outcome) {
                    return Err(error(BaselineParseErrorKind::DuplicateSubtest(
                        name.to_owned(),
                    )));
                }
                current = Some(Target::Subtest(name.to_owned()));
            } else {
                return Err(error(BaselineParseErrorKind::UnexpectedLine(
                    line.to_owned(),
                )));
            }
        }

        Ok(Self {
            header: Some(header),
            outcomes,
        })
    }

    /// Returns the header this baseline was parsed with, or `None` for an absent or abbreviated
    /// baseline.
    pub fn header(&self) -> Option<BaselineHeader> {
        self.header
    }

    /// Returns the expected outcomes.
    pub fn outcomes(&self) -> &Outcomes {
        &self.outcomes
    }

    /// Renders this baseline back to text.
    pub fn format(&self) -> String {
        self.outcomes
            .format(self.header.unwrap_or(BaselineHeader::Testharness))
    }

    /// Compares observed outcomes against this baseline.
    ///
    /// Every observed subtest must have a status allowed by the baseline (subtests absent from
    /// the baseline must pass). For `FAIL` and `PRECONDITION_FAILED`, a non-empty baseline message
    /// must also match. Subtests recorded in the baseline but never observed fail the
    /// comparison, and the harness error statuses must agree exactly.
    pub fn compare(&self, observed: &Outcomes) -> Result<(), BaselineMismatch> {
        for (name, actual) in &observed.subtests {
            let expected = self.outcomes.subtests.get(name);
            for status in &actual.statuses {
                let allowed = match expected {
                    Some(expected) => expected.statuses.contains(status),
                    None => *status == BaselineStatus::Pass,
                };
                if !allowed {
                    return Err(BaselineMismatch::Status {
                        subtest: name.clone(),
                        actual: *status,
                    });
                }

                let expected_message = expected
                    .and_then(|expected| expected.message.as_deref())
                    .filter(|message| !message.is_empty());
                if let Some(expected_message) = expected_message {
                    let checks_message = matches!(
                        status,
                        BaselineStatus::Fail | BaselineStatus::PreconditionFailed
                    );
                    if checks_message && actual.message.as_deref() != Some(expected_message.trim())
                    {
                        return Err(BaselineMismatch::Message {
                            subtest: name.clone(),
                        });
                    }
                }
            }
        }

        let stale: Vec<_> = self
            .outcomes
            .subtests
            .keys()
            .filter(|name| !observed.subtests.contains_key(*name))
            .cloned()
            .collect();
        if !stale.is_empty() {
            return Err(BaselineMismatch::StaleSubtests(stale));
        }

        let expected_harness = self.outcomes.harness_error.as_ref().map(|o| &o.statuses);
        let actual_harness = observed.harness_error.as_ref().map(|o| &o.statuses);
        if expected_harness != actual_harness {
            return Err(BaselineMismatch::HarnessError);
        }

        Ok(())
    }

    /// Returns true if the observed outcomes satisfy this baseline.
    pub fn matches(&self, observed: &Outcomes) -> bool {
        self.compare(observed).is_ok()
    }
}

/// The first reason observed outcomes did not satisfy a baseline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BaselineMismatch {
    /// A subtest reported a status the baseline does not allow.
    Status {
        /// The subtest name.
        subtest: String,
        /// The observed status.
        actual: BaselineStatus,
    },

    /// A failing subtest reported a different message than the baseline.
    Message {
        /// The subtest name.
        subtest: String,
    },

    /// The baseline lists subtests that did not run.
    StaleSubtests(Vec<String>),

    /// The harness error statuses differ.
    HarnessError,
}

enum Target {
    HarnessError,
    Subtest(String),
}

fn parse_statuses(input: &str) -> Result<BTreeSet<BaselineStatus>, BaselineParseErrorKind> {
    let statuses = input
        .split_whitespace()
        .map(|token| {
            BaselineStatus::from_raw(token)
                .ok_or_else(|| BaselineParseErrorKind::UnknownStatus(token.to_owned()))
        })
        .collect::<Result<BTreeSet<_>, _>>()?;
    if statuses.is_empty() {
        return Err(BaselineParseErrorKind::EmptyStatuses);
    }
    Ok(statuses)
}
