// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Early-abort thresholds for runs with too many unexpected results.

use crate::errors::ThresholdParseError;
use serde::Deserialize;
use std::{fmt, num::NonZeroUsize, str::FromStr};
use wpt_results_metadata::ResultType;

/// The number of unexpected results of one kind a run tolerates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Threshold {
    /// Never abort.
    #[default]
    Unbounded,

    /// Tolerate this many unexpected results, and abort on the next one.
    Count(NonZeroUsize),
}

impl Threshold {
    /// Returns true if `seen` unexpected results exceed this threshold.
    pub fn is_exceeded(&self, seen: usize) -> bool {
        match self {
            Self::Unbounded => false,
            Self::Count(count) => seen > count.get(),
        }
    }
}

impl FromStr for Threshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(Self::Unbounded);
        }
        let count = s
            .parse::<isize>()
            .map_err(|_| ThresholdParseError::new(s, "expected a positive integer or \"unbounded\""))?;
        usize::try_from(count)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self::Count)
            .ok_or_else(|| ThresholdParseError::new(s, "threshold may not be <= 0"))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Count(count) => write!(f, "{count}"),
        }
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = Threshold;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a positive integer or the string \"unbounded\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "unbounded" {
                    return Ok(Threshold::Unbounded);
                }

                // Suggest the integer form for quoted numbers.
                if let Ok(val) = v.parse::<i64>() {
                    let expected = if val > 0 {
                        "the string \"unbounded\" (numbers must be specified without quotes)"
                    } else {
                        "the string \"unbounded\" (numbers must be positive and without quotes)"
                    };
                    return Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &expected,
                    ));
                }

                Err(serde::de::Error::invalid_value(
                    serde::de::Unexpected::Str(v),
                    &"the string \"unbounded\" or a positive integer",
                ))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                usize::try_from(v)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(Threshold::Count)
                    .ok_or_else(|| {
                        serde::de::Error::invalid_value(
                            serde::de::Unexpected::Signed(v),
                            &"a positive integer or the string \"unbounded\"",
                        )
                    })
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                usize::try_from(v)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(Threshold::Count)
                    .ok_or_else(|| {
                        serde::de::Error::invalid_value(
                            serde::de::Unexpected::Unsigned(v),
                            &"a positive integer or the string \"unbounded\"",
                        )
                    })
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Which budget was exhausted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThresholdExceeded {
    /// Too many unexpected failures.
    Failures,

    /// Too many unexpected crashes and timeouts, counted together.
    CrashesOrTimeouts,
}

impl ThresholdExceeded {
    /// Returns a short description of the exhausted budget.
    pub fn description(self) -> &'static str {
        match self {
            Self::Failures => "failures",
            Self::CrashesOrTimeouts => "crashes/timeouts",
        }
    }
}

impl fmt::Display for ThresholdExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Tracks unexpected results against both abort budgets.
#[derive(Clone, Debug, Default)]
pub struct AbortThresholds {
    failure: Threshold,
    crash_timeout: Threshold,
    failures_seen: usize,
    crashes_timeouts_seen: usize,
    exceeded: Option<ThresholdExceeded>,
}

impl AbortThresholds {
    /// Creates a new tracker.
    pub fn new(failure: Threshold, crash_timeout: Threshold) -> Self {
        Self {
            failure,
            crash_timeout,
            ..Default::default()
        }
    }

    /// Records an unexpected result.
    ///
    /// Returns the exhausted budget the first time either budget is exhausted, and `None`
    /// afterwards.
    pub fn record_unexpected(&mut self, actual: ResultType) -> Option<ThresholdExceeded> {
        let exceeded = match actual {
            ResultType::Failure => {
                self.failures_seen += 1;
                self.failure
                    .is_exceeded(self.failures_seen)
                    .then_some(ThresholdExceeded::Failures)
            }
            ResultType::Crash | ResultType::Timeout => {
                self.crashes_timeouts_seen += 1;
                self.crash_timeout
                    .is_exceeded(self.crashes_timeouts_seen)
                    .then_some(ThresholdExceeded::CrashesOrTimeouts)
            }
            ResultType::Pass | ResultType::Skip => None,
        }?;

        if self.exceeded.is_some() {
            return None;
        }
        self.exceeded = Some(exceeded);
        Some(exceeded)
    }

    /// Returns the exhausted budget, if any.
    pub fn exceeded(&self) -> Option<ThresholdExceeded> {
        self.exceeded
    }
}
