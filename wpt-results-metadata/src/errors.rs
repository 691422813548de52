// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while parsing a [`ResultType`](crate::ResultType) from
/// its serialized form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseResultTypeError {
    input: String,
}

impl ParseResultTypeError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for ParseResultTypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unknown result type `{}` (known types: PASS, FAIL, SKIP, TIMEOUT, CRASH)",
            self.input
        )
    }
}

impl error::Error for ParseResultTypeError {}
