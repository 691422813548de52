// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::ParseResultTypeError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The normalized outcome of a test attempt.
///
/// Variants are declared in order of increasing interest, so the derived
/// `Ord` sorts `Pass` first and `Crash` last.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ResultType {
    /// The test passed.
    #[serde(rename = "PASS")]
    Pass,

    /// The test failed.
    #[serde(rename = "FAIL")]
    Failure,

    /// The test was skipped.
    #[serde(rename = "SKIP")]
    Skip,

    /// The test timed out.
    #[serde(rename = "TIMEOUT")]
    Timeout,

    /// The test crashed.
    #[serde(rename = "CRASH")]
    Crash,
}

impl ResultType {
    /// All result types, in order.
    pub const ALL: [ResultType; 5] = [
        ResultType::Pass,
        ResultType::Failure,
        ResultType::Skip,
        ResultType::Timeout,
        ResultType::Crash,
    ];

    /// Returns the serialized form of this result type, as used in
    /// `full_results.json`.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Pass => "PASS",
            ResultType::Failure => "FAIL",
            ResultType::Skip => "SKIP",
            ResultType::Timeout => "TIMEOUT",
            ResultType::Crash => "CRASH",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = ParseResultTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result_type = match s {
            "PASS" => ResultType::Pass,
            "FAIL" => ResultType::Failure,
            "SKIP" => ResultType::Skip,
            "TIMEOUT" => ResultType::Timeout,
            "CRASH" => ResultType::Crash,
            other => return Err(ParseResultTypeError::new(other)),
        };
        Ok(result_type)
    }
}
