// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping between raw runner statuses and normalized result types.
//!
//! The test runner reports one of a fixed vocabulary of status strings for every test and
//! subtest. This module normalizes those statuses into [`ResultType`]s, and answers the reverse
//! question: which raw statuses could a test of a given type produce, for a set of expected
//! result types.

use crate::errors::{NoSubtestsError, TestTypeParseError, UnknownStatusError};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    str::FromStr,
    sync::{Arc, LazyLock, Mutex},
};
use wpt_results_metadata::ResultType;

/// A raw status reported by the test runner.
///
/// Variants are declared in status-table order, which is also the canonical order used when
/// listing statuses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RunnerStatus {
    /// `OK`: a test-level status for harness-based tests that ran to completion.
    Ok,
    /// `FAIL`
    Fail,
    /// `PASS`
    Pass,
    /// `TIMEOUT`
    Timeout,
    /// `ERROR`
    Error,
    /// `CRASH`
    Crash,
    /// `PRECONDITION_FAILED`
    PreconditionFailed,
    /// `SKIP`
    Skip,
    /// `NOTRUN`
    NotRun,
}

impl RunnerStatus {
    /// All runner statuses, in status-table order.
    pub const ALL: [RunnerStatus; 9] = [
        RunnerStatus::Ok,
        RunnerStatus::Fail,
        RunnerStatus::Pass,
        RunnerStatus::Timeout,
        RunnerStatus::Error,
        RunnerStatus::Crash,
        RunnerStatus::PreconditionFailed,
        RunnerStatus::Skip,
        RunnerStatus::NotRun,
    ];

    /// Returns the status string as reported by the runner.
    pub fn as_str(self) -> &'static str {
        match self {
            RunnerStatus::Ok => "OK",
            RunnerStatus::Fail => "FAIL",
            RunnerStatus::Pass => "PASS",
            RunnerStatus::Timeout => "TIMEOUT",
            RunnerStatus::Error => "ERROR",
            RunnerStatus::Crash => "CRASH",
            RunnerStatus::PreconditionFailed => "PRECONDITION_FAILED",
            RunnerStatus::Skip => "SKIP",
            RunnerStatus::NotRun => "NOTRUN",
        }
    }

    /// Returns the normalized result type for this status.
    pub fn result_type(self) -> ResultType {
        match self {
            RunnerStatus::Ok | RunnerStatus::Pass => ResultType::Pass,
            RunnerStatus::Fail
            | RunnerStatus::Error
            | RunnerStatus::PreconditionFailed
            | RunnerStatus::NotRun => ResultType::Failure,
            RunnerStatus::Timeout => ResultType::Timeout,
            RunnerStatus::Crash => ResultType::Crash,
            RunnerStatus::Skip => ResultType::Skip,
        }
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerStatus {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunnerStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatusError::new(s))
    }
}

/// Normalizes a raw status string into a [`ResultType`].
pub fn to_result_type(raw: &str) -> Result<ResultType, UnknownStatusError> {
    raw.parse::<RunnerStatus>().map(RunnerStatus::result_type)
}

/// A status that can be recorded in a baseline file.
///
/// Variants are declared in canonical baseline order, so a `BTreeSet<BaselineStatus>` iterates
/// in the order statuses are written.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum BaselineStatus {
    /// `FAIL`
    Fail,
    /// `PASS`
    Pass,
    /// `TIMEOUT`
    Timeout,
    /// `ERROR`
    Error,
    /// `PRECONDITION_FAILED`
    PreconditionFailed,
    /// `NOTRUN`
    NotRun,
}

impl BaselineStatus {
    /// Converts a runner status to a baseline status, if it can be recorded in a baseline.
    ///
    /// `OK`, `CRASH` and `SKIP` are never recorded.
    pub fn from_runner(status: RunnerStatus) -> Option<Self> {
        match status {
            RunnerStatus::Fail => Some(BaselineStatus::Fail),
            RunnerStatus::Pass => Some(BaselineStatus::Pass),
            RunnerStatus::Timeout => Some(BaselineStatus::Timeout),
            RunnerStatus::Error => Some(BaselineStatus::Error),
            RunnerStatus::PreconditionFailed => Some(BaselineStatus::PreconditionFailed),
            RunnerStatus::NotRun => Some(BaselineStatus::NotRun),
            RunnerStatus::Ok | RunnerStatus::Crash | RunnerStatus::Skip => None,
        }
    }

    /// Parses a raw status string into a baseline status. Returns `None` for unknown statuses and
    /// for statuses that are never recorded.
    pub fn from_raw(raw: &str) -> Option<Self> {
        raw.parse::<RunnerStatus>()
            .ok()
            .and_then(BaselineStatus::from_runner)
    }

    /// Returns the status string as written in baselines.
    pub fn as_str(self) -> &'static str {
        match self {
            BaselineStatus::Fail => "FAIL",
            BaselineStatus::Pass => "PASS",
            BaselineStatus::Timeout => "TIMEOUT",
            BaselineStatus::Error => "ERROR",
            BaselineStatus::PreconditionFailed => "PRECONDITION_FAILED",
            BaselineStatus::NotRun => "NOTRUN",
        }
    }
}

impl fmt::Display for BaselineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a WPT test, as recorded in the WPT manifest.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    /// A testharness.js test, made up of subtests.
    Testharness,
    /// A reference test comparing screenshots.
    Reftest,
    /// A reference test comparing printed output.
    PrintReftest,
    /// A WebDriver spec test, made up of subtests.
    Wdspec,
    /// A test that passes if the browser does not crash.
    Crashtest,
}

impl TestType {
    /// All test types.
    pub const ALL: [TestType; 5] = [
        TestType::Testharness,
        TestType::Reftest,
        TestType::PrintReftest,
        TestType::Wdspec,
        TestType::Crashtest,
    ];

    /// Returns the name of this test type, as used in the WPT manifest.
    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Testharness => "testharness",
            TestType::Reftest => "reftest",
            TestType::PrintReftest => "print-reftest",
            TestType::Wdspec => "wdspec",
            TestType::Crashtest => "crashtest",
        }
    }

    /// Returns true if tests of this type report subtests, and so are judged against a baseline.
    pub fn can_have_subtests(self) -> bool {
        matches!(self, TestType::Testharness | TestType::Wdspec)
    }

    /// Returns the raw statuses this test type can legally produce at the given granularity.
    pub fn legal_statuses(
        self,
        granularity: Granularity,
    ) -> Result<&'static [RunnerStatus], NoSubtestsError> {
        use RunnerStatus as S;

        let statuses: &'static [RunnerStatus] = match (self, granularity) {
            (TestType::Testharness, Granularity::Test) => {
                &[S::Ok, S::Timeout, S::Error, S::Crash, S::PreconditionFailed]
            }
            (TestType::Testharness, Granularity::Subtest) => {
                &[S::Fail, S::Pass, S::Timeout, S::PreconditionFailed, S::NotRun]
            }
            (TestType::Reftest | TestType::PrintReftest, Granularity::Test) => {
                &[S::Fail, S::Pass, S::Timeout, S::Error, S::Crash]
            }
            (TestType::Wdspec, Granularity::Test) => &[S::Ok, S::Timeout, S::Error, S::Crash],
            (TestType::Wdspec, Granularity::Subtest) => &[S::Fail, S::Pass, S::Error],
            (TestType::Crashtest, Granularity::Test) => &[S::Pass, S::Timeout, S::Error, S::Crash],
            (_, Granularity::Subtest) => return Err(NoSubtestsError::new(self)),
        };
        Ok(statuses)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = TestTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestType::ALL
            .into_iter()
            .find(|test_type| test_type.as_str() == s)
            .ok_or_else(|| TestTypeParseError::new(s))
    }
}

/// Whether a status is reported for a whole test or for one of its subtests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Granularity {
    /// A test-level status.
    Test,
    /// A subtest-level status.
    Subtest,
}

type InverseKey = (BTreeSet<ResultType>, TestType, Granularity);

static INVERSE_CACHE: LazyLock<Mutex<HashMap<InverseKey, Arc<BTreeSet<RunnerStatus>>>>> =
    LazyLock::new(Default::default);

/// Returns every raw status a test of `test_type` could report at `granularity` that normalizes
/// into one of `expected`.
///
/// Results are cached for the lifetime of the process.
pub fn runner_statuses(
    expected: &BTreeSet<ResultType>,
    test_type: TestType,
    granularity: Granularity,
) -> Result<Arc<BTreeSet<RunnerStatus>>, NoSubtestsError> {
    let key = (expected.clone(), test_type, granularity);
    // Entries are computed independently, so a poisoned map is still usable.
    let mut cache = INVERSE_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(statuses) = cache.get(&key) {
        return Ok(Arc::clone(statuses));
    }

    let statuses: BTreeSet<_> = test_type
        .legal_statuses(granularity)?
        .iter()
        .copied()
        .filter(|status| expected.contains(&status.result_type()))
        .collect();
    let statuses = Arc::new(statuses);
    cache.insert(key, Arc::clone(&statuses));
    Ok(statuses)
}

/// Parses raw status strings and returns them deduplicated in status-table order.
pub fn normalize_statuses<'a>(
    raw: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<RunnerStatus>, UnknownStatusError> {
    let statuses = raw
        .into_iter()
        .map(str::parse)
        .collect::<Result<BTreeSet<RunnerStatus>, _>>()?;
    Ok(statuses.into_iter().collect())
}
