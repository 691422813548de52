// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The final `full_results.json` report and the files derived from it.

use crate::{errors::WriteReportError, result::WptResult};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use itertools::Itertools;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::Write,
};
use tracing::warn;
use wpt_results_metadata::{FULL_RESULTS_VERSION, FullResults, ResultType, TestLeaf, TestTrie};

/// The name of the full results file, in the artifacts directory.
pub const FULL_RESULTS_FILE_NAME: &str = "full_results.json";

/// The name of the JSONP version of the full results.
pub const FULL_RESULTS_JSONP_FILE_NAME: &str = "full_results_jsonp.js";

/// The name of the trimmed JSONP results containing only regressions.
pub const FAILING_RESULTS_FILE_NAME: &str = "failing_results.json";

/// Every attempt of every test, in the order tests first finished.
#[derive(Clone, Debug, Default)]
pub struct ResultsHistory {
    attempts: IndexMap<String, Vec<WptResult>>,
    slow_tests: BTreeSet<String>,
}

impl ResultsHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attempt.
    pub fn push(&mut self, result: WptResult) {
        self.attempts
            .entry(result.name().to_owned())
            .or_default()
            .push(result);
    }

    /// Marks a test as slow.
    pub fn mark_slow(&mut self, test: &str) {
        self.slow_tests.insert(test.to_owned());
    }

    /// Returns the attempts for a test.
    pub fn get(&self, test: &str) -> Option<&[WptResult]> {
        self.attempts.get(test).map(Vec::as_slice)
    }

    /// Iterates over tests and their attempts.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[WptResult])> {
        self.attempts
            .iter()
            .map(|(name, attempts)| (name.as_str(), attempts.as_slice()))
    }

    /// Returns the number of distinct tests.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Returns true if no results were recorded.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Returns the number of tests whose last attempt was a regression.
    pub fn num_regressions(&self) -> usize {
        self.attempts
            .values()
            .filter(|attempts| attempts.last().is_some_and(WptResult::is_regression))
            .count()
    }

    fn is_slow(&self, test: &str) -> bool {
        self.slow_tests.contains(test)
    }
}

/// Everything besides the history that goes into a report.
#[derive(Clone, Copy, Debug)]
pub struct ReportContext<'a> {
    /// Result type counts from the first iteration.
    pub num_failures_by_type: &'a BTreeMap<ResultType, usize>,

    /// Whether the run was cut short.
    pub interrupted: bool,

    /// When the report was produced.
    pub seconds_since_epoch: i64,

    /// The web tests directory.
    pub layout_tests_dir: &'a Utf8Path,

    /// The flag-specific configuration name.
    pub flag_name: Option<&'a str>,

    /// The shard index, if sharded.
    pub shard_index: Option<usize>,
}

/// Builds the final report from the results history.
pub fn build_full_results(history: &ResultsHistory, cx: &ReportContext<'_>) -> FullResults {
    let mut tests = TestTrie::new();
    let mut num_passes = 0;

    for (name, attempts) in history.iter() {
        let (Some(first), Some(last)) = (attempts.first(), attempts.last()) else {
            continue;
        };
        if last.actual() == ResultType::Pass {
            num_passes += 1;
        }

        let leaf = build_leaf(attempts, first, last, history.is_slow(name), cx.shard_index);
        if let Err(error) = tests.insert(name, leaf) {
            warn!("skipping {name} in the results trie: {error}");
        }
    }

    let mut num_failures_by_type: BTreeMap<_, _> =
        ResultType::ALL.iter().map(|&result| (result, 0)).collect();
    num_failures_by_type.extend(cx.num_failures_by_type);

    FullResults {
        version: FULL_RESULTS_VERSION,
        interrupted: cx.interrupted,
        path_delimiter: "/".to_owned(),
        seconds_since_epoch: cx.seconds_since_epoch,
        layout_tests_dir: cx.layout_tests_dir.to_string(),
        flag_name: cx.flag_name.map(str::to_owned),
        skipped: num_failures_by_type[&ResultType::Skip],
        num_failures_by_type,
        num_passes,
        num_regressions: history.num_regressions(),
        tests,
    }
}

fn build_leaf(
    attempts: &[WptResult],
    first: &WptResult,
    last: &WptResult,
    is_slow_test: bool,
    shard: Option<usize>,
) -> TestLeaf {
    let actuals: Vec<ResultType> = attempts.iter().map(WptResult::actual).collect();

    // Paths from every attempt are concatenated, in attempt order.
    let mut artifacts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for attempt in attempts {
        for (id, paths) in attempt.record().artifacts.iter() {
            artifacts
                .entry(id.to_owned())
                .or_default()
                .extend(paths.iter().cloned());
        }
    }

    let time = (first.record().took.as_secs_f64() * 10.0).round() / 10.0;

    TestLeaf {
        expected: first.record().expected.iter().join(" "),
        actual: actuals.iter().join(" "),
        shard,
        is_flaky: actuals.iter().unique().count() > 1,
        time: (time != 0.0).then_some(time),
        is_slow_test,
        is_unexpected: last.unexpected(),
        is_regression: last.is_regression(),
        image_diff_stats: first.record().image_diff_stats,
        artifacts,
        has_stderr: attempts.iter().any(|attempt| attempt.wpt().has_stderr),
    }
}

/// Writes report files into the artifacts directory.
#[derive(Clone, Debug)]
pub struct ResultsWriter {
    artifacts_dir: Utf8PathBuf,
}

impl ResultsWriter {
    /// Creates a writer for the given artifacts directory.
    pub fn new(artifacts_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Writes `full_results.json`, its JSONP variant and the regressions-only
    /// `failing_results.json`.
    ///
    /// If `json_test_results` is set, `full_results.json` is also copied there.
    pub fn write(
        &self,
        results: &FullResults,
        json_test_results: Option<&Utf8Path>,
    ) -> Result<(), WriteReportError> {
        fs::create_dir_all(&self.artifacts_dir).map_err(|error| WriteReportError::CreateDir {
            path: self.artifacts_dir.clone(),
            error,
        })?;

        let serialized = serde_json::to_string(results).map_err(WriteReportError::Serialize)?;
        write_atomic(&self.artifacts_dir.join(FULL_RESULTS_FILE_NAME), &[&serialized])?;
        if let Some(path) = json_test_results {
            write_atomic(path, &[&serialized])?;
        }
        write_atomic(
            &self.artifacts_dir.join(FULL_RESULTS_JSONP_FILE_NAME),
            &["ADD_FULL_RESULTS(", &serialized, ");"],
        )?;

        let mut failing = results.clone();
        failing.trim_to_regressions();
        let serialized = serde_json::to_string(&failing).map_err(WriteReportError::Serialize)?;
        write_atomic(
            &self.artifacts_dir.join(FAILING_RESULTS_FILE_NAME),
            &["ADD_RESULTS(", &serialized, ");"],
        )
    }
}

pub(crate) fn write_atomic(path: &Utf8Path, chunks: &[&str]) -> Result<(), WriteReportError> {
    atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite)
        .write(|file| {
            for chunk in chunks {
                file.write_all(chunk.as_bytes())?;
            }
            Ok(())
        })
        .map_err(|error| WriteReportError::Write {
            path: path.to_owned(),
            error,
        })
}
