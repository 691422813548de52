// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declared expectations from Chromium `TestExpectations` files.
//!
//! Each non-comment line has the form
//!
//! ```text
//! [bug...] [ [ tag... ] ] test-or-glob [ result... ]
//! ```
//!
//! A line only applies if every one of its tags is among the configured platform tags. A glob
//! ends in `*` and matches every test with that prefix. An exact match takes precedence over
//! globs, and a longer glob over a shorter one. Lines with equal precedence are merged.

use crate::{
    errors::{ExpectationsParseError, ExpectationsParseErrorKind},
    web_tests::split_virtual,
};
use camino::Utf8Path;
use std::{
    collections::{BTreeSet, HashMap},
    fs,
};
use wpt_results_metadata::ResultType;

const BUG_PREFIXES: &[&str] = &["crbug.com/", "skbug.com/", "webkit.org/b/", "Bug("];

/// What the expectations say about one test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestExpectation {
    /// The declared expected results.
    pub expected: BTreeSet<ResultType>,

    /// Whether the test is marked `Slow`.
    pub is_slow: bool,
}

impl Default for TestExpectation {
    fn default() -> Self {
        Self {
            expected: BTreeSet::from([ResultType::Pass]),
            is_slow: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct LineResults {
    results: BTreeSet<ResultType>,
    is_slow: bool,
}

impl LineResults {
    fn merge(&mut self, other: &LineResults) {
        self.results.extend(other.results.iter().copied());
        self.is_slow |= other.is_slow;
    }
}

/// Expectations parsed from any number of files, filtered to one platform.
#[derive(Clone, Debug, Default)]
pub struct TestExpectations {
    exact: HashMap<String, LineResults>,
    globs: Vec<(String, LineResults)>,
}

impl TestExpectations {
    /// Creates an empty set of expectations, under which every test is expected to pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and adds an expectations file.
    pub fn load(
        &mut self,
        path: &Utf8Path,
        platform_tags: &[String],
    ) -> Result<(), ExpectationsParseError> {
        let contents = fs::read_to_string(path).map_err(|error| {
            ExpectationsParseError::new(path, ExpectationsParseErrorKind::Read(error))
        })?;
        self.add(&contents, platform_tags)
            .map_err(|kind| ExpectationsParseError::new(path, kind))
    }

    /// Adds the expectations in `contents`.
    pub fn add(
        &mut self,
        contents: &str,
        platform_tags: &[String],
    ) -> Result<(), ExpectationsParseErrorKind> {
        let platform_tags: BTreeSet<String> = platform_tags
            .iter()
            .map(|tag| tag.to_ascii_lowercase())
            .collect();

        for (index, line) in contents.lines().enumerate() {
            let line_no = index + 1;
            let line = line.split_once(" #").map_or(line, |(before, _)| before).trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = parse_line(line).map_err(|message| {
                ExpectationsParseErrorKind::InvalidLine {
                    line: line_no,
                    message,
                }
            })?;
            if !parsed
                .tags
                .iter()
                .all(|tag| platform_tags.contains(&tag.to_ascii_lowercase()))
            {
                continue;
            }

            match parsed.test.strip_suffix('*') {
                Some(prefix) => {
                    match self.globs.iter_mut().find(|(existing, _)| existing == prefix) {
                        Some((_, results)) => results.merge(&parsed.results),
                        None => self.globs.push((prefix.to_owned(), parsed.results)),
                    }
                }
                None => self
                    .exact
                    .entry(parsed.test.to_owned())
                    .or_default()
                    .merge(&parsed.results),
            }
        }
        Ok(())
    }

    /// Returns the expectation for `test`.
    ///
    /// A virtual test without expectations of its own inherits its base test's.
    pub fn get(&self, test: &str) -> TestExpectation {
        let results = self.lookup(test).or_else(|| match split_virtual(test) {
            (Some(_), base) => self.lookup(base),
            (None, _) => None,
        });
        let Some(results) = results else {
            return TestExpectation::default();
        };

        let mut expectation = TestExpectation {
            expected: results.results.clone(),
            is_slow: results.is_slow,
        };
        if expectation.expected.is_empty() {
            expectation.expected.insert(ResultType::Pass);
        }
        expectation
    }

    fn lookup(&self, test: &str) -> Option<&LineResults> {
        self.exact.get(test).or_else(|| {
            self.globs
                .iter()
                .filter(|(prefix, _)| test.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, results)| results)
        })
    }
}

struct ParsedLine<'a> {
    tags: Vec<&'a str>,
    test: &'a str,
    results: LineResults,
}

fn parse_line(line: &str) -> Result<ParsedLine<'_>, String> {
    let mut tokens = line.split_whitespace().peekable();
    while tokens
        .next_if(|token| BUG_PREFIXES.iter().any(|prefix| token.starts_with(prefix)))
        .is_some()
    {}

    let tags = if tokens.next_if_eq(&"[").is_some() {
        bracketed(&mut tokens).ok_or("unterminated tag list")?
    } else {
        Vec::new()
    };

    let test = tokens.next().ok_or("missing test name")?;
    if test.starts_with('[') {
        return Err(format!("expected a test name, found `{test}`"));
    }
    if let Some(star) = test.find('*')
        && star != test.len() - 1
    {
        return Err(format!("`{test}`: globs may only end in `*`"));
    }

    if tokens.next_if_eq(&"[").is_none() {
        return Err(format!("`{test}`: missing result list"));
    }
    let mut results = LineResults::default();
    for result in bracketed(&mut tokens).ok_or("unterminated result list")? {
        let result_type = match result {
            "Slow" => {
                results.is_slow = true;
                continue;
            }
            "Pass" => ResultType::Pass,
            "Failure" => ResultType::Failure,
            "Crash" => ResultType::Crash,
            "Timeout" => ResultType::Timeout,
            "Skip" => ResultType::Skip,
            other => return Err(format!("unknown result `{other}`")),
        };
        results.results.insert(result_type);
    }

    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected token `{extra}` after results"));
    }
    Ok(ParsedLine {
        tags,
        test,
        results,
    })
}

fn bracketed<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Option<Vec<&'a str>> {
    let mut items = Vec::new();
    for token in tokens {
        if token == "]" {
            return Some(items);
        }
        items.push(token);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const EXPECTATIONS: &str = indoc! {"
        # tags: [ Linux Mac Win ]
        # results: [ Pass Failure Crash Timeout Skip Slow ]

        crbug.com/1 external/wpt/dom/a.html [ Failure ]
        crbug.com/2 [ Mac ] external/wpt/dom/b.html [ Timeout ]
        [ Linux ] external/wpt/dom/b.html [ Failure Pass ]  # flaky
        external/wpt/css/* [ Skip ]
        external/wpt/css/keep/* [ Pass Slow ]
        external/wpt/css/keep/exact.html [ Crash ]
        virtual/v/external/wpt/dom/c.html [ Timeout ]
        external/wpt/dom/c.html [ Failure ]
        external/wpt/dom/slow.html [ Slow ]
    "};

    fn expectations() -> TestExpectations {
        let mut expectations = TestExpectations::new();
        expectations
            .add(EXPECTATIONS, &["linux".to_owned(), "Release".to_owned()])
            .unwrap();
        expectations
    }

    #[test_case("external/wpt/dom/a.html", btreeset! {ResultType::Failure}; "exact")]
    #[test_case("external/wpt/dom/b.html", btreeset! {ResultType::Pass, ResultType::Failure}; "tag filtered")]
    #[test_case("external/wpt/css/x/y.html", btreeset! {ResultType::Skip}; "glob")]
    #[test_case("external/wpt/css/keep/y.html", btreeset! {ResultType::Pass}; "longest glob")]
    #[test_case("external/wpt/css/keep/exact.html", btreeset! {ResultType::Crash}; "exact beats glob")]
    #[test_case("virtual/v/external/wpt/dom/c.html", btreeset! {ResultType::Timeout}; "virtual")]
    #[test_case("virtual/w/external/wpt/dom/c.html", btreeset! {ResultType::Failure}; "virtual inherits base")]
    #[test_case("external/wpt/dom/slow.html", btreeset! {ResultType::Pass}; "slow only")]
    #[test_case("external/wpt/other.html", btreeset! {ResultType::Pass}; "default")]
    fn expected(test: &str, expected: BTreeSet<ResultType>) {
        assert_eq!(expectations().get(test).expected, expected);
    }

    #[test]
    fn slow() {
        let expectations = expectations();
        assert!(expectations.get("external/wpt/dom/slow.html").is_slow);
        assert!(expectations.get("external/wpt/css/keep/y.html").is_slow);
        assert!(!expectations.get("external/wpt/dom/a.html").is_slow);
    }

    #[test_case("external/wpt/a.html", "missing result list"; "no results")]
    #[test_case("external/wpt/a.html [ Failure", "unterminated result list"; "unterminated")]
    #[test_case("external/wpt/a.html [ Flaky ]", "unknown result `Flaky`"; "unknown result")]
    #[test_case("external/*/a.html [ Skip ]", "globs may only end in `*`"; "inner glob")]
    #[test_case("[ Linux external/wpt/a.html", "unterminated tag list"; "unterminated tags")]
    fn invalid_lines(line: &str, message: &str) {
        let error = TestExpectations::new()
            .add(&format!("# comment\n{line}\n"), &[])
            .unwrap_err();
        match error {
            ExpectationsParseErrorKind::InvalidLine {
                line: 2,
                message: actual,
            } => assert!(actual.contains(message), "{actual}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
