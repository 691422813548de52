// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::ResultType;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, error, fmt};

/// The version of the `full_results.json` format produced by this crate.
pub const FULL_RESULTS_VERSION: u32 = 3;

/// The top-level `full_results.json` document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FullResults {
    /// The format version, currently [`FULL_RESULTS_VERSION`].
    pub version: u32,

    /// True if the run did not complete, either because of a signal or because an abort threshold
    /// was exceeded.
    pub interrupted: bool,

    /// The delimiter between test name components in [`Self::tests`]. Always `/`.
    pub path_delimiter: String,

    /// When the document was produced, in seconds since the Unix epoch.
    pub seconds_since_epoch: i64,

    /// The directory containing the web tests.
    pub layout_tests_dir: String,

    /// The name of the flag-specific configuration the tests ran under, if any.
    pub flag_name: Option<String>,

    /// Counts of first-attempt results, keyed by result type.
    pub num_failures_by_type: BTreeMap<ResultType, usize>,

    /// The number of tests whose last attempt passed.
    pub num_passes: usize,

    /// The number of tests whose last attempt was a regression.
    pub num_regressions: usize,

    /// The number of tests skipped on the first attempt.
    pub skipped: usize,

    /// The results trie.
    pub tests: TestTrie,
}

impl FullResults {
    /// Prunes [`Self::tests`] so that only regressions remain.
    ///
    /// This is how `failing_results.json` is derived from `full_results.json`.
    pub fn trim_to_regressions(&mut self) {
        self.tests.trim_to_regressions();
    }
}

/// A trie of test results keyed by `/`-separated test name components.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestTrie {
    children: BTreeMap<String, TrieNode>,
}

/// A node in a [`TestTrie`]: either a test leaf or a nested directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrieNode {
    /// A test result.
    Leaf(TestLeaf),

    /// A directory of further nodes.
    Dir(TestTrie),
}

impl TestTrie {
    /// Creates a new, empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the trie has no nodes.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns the children of this trie node.
    pub fn children(&self) -> &BTreeMap<String, TrieNode> {
        &self.children
    }

    /// Inserts a leaf at the given `/`-separated path, creating directories as necessary.
    ///
    /// Returns an error if a component of the path is already a leaf, or if the full path is
    /// already a directory.
    pub fn insert(&mut self, path: &str, leaf: TestLeaf) -> Result<(), TrieInsertError> {
        let (dirs, name) = match path.rsplit_once('/') {
            Some((dirs, name)) => (Some(dirs), name),
            None => (None, path),
        };

        let mut current = self;
        for component in dirs.into_iter().flat_map(|dirs| dirs.split('/')) {
            let node = current
                .children
                .entry(component.to_owned())
                .or_insert_with(|| TrieNode::Dir(TestTrie::new()));
            current = match node {
                TrieNode::Dir(dir) => dir,
                TrieNode::Leaf(_) => return Err(TrieInsertError::new(path, component)),
            };
        }

        if matches!(current.children.get(name), Some(TrieNode::Dir(_))) {
            return Err(TrieInsertError::new(path, name));
        }
        current
            .children
            .insert(name.to_owned(), TrieNode::Leaf(leaf));
        Ok(())
    }

    /// Looks up the leaf at the given `/`-separated path.
    pub fn get(&self, path: &str) -> Option<&TestLeaf> {
        let mut current = self;
        let mut components = path.split('/').peekable();
        while let Some(component) = components.next() {
            match (current.children.get(component)?, components.peek()) {
                (TrieNode::Leaf(leaf), None) => return Some(leaf),
                (TrieNode::Dir(dir), Some(_)) => current = dir,
                _ => return None,
            }
        }
        None
    }

    /// Returns all leaves in the trie along with their full paths, in sorted order.
    pub fn leaves(&self) -> Vec<(String, &TestLeaf)> {
        let mut out = Vec::new();
        self.collect_leaves("", &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a TestLeaf)>) {
        for (name, node) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            match node {
                TrieNode::Leaf(leaf) => out.push((path, leaf)),
                TrieNode::Dir(dir) => dir.collect_leaves(&path, out),
            }
        }
    }

    /// Removes every leaf that is not a regression, then every directory left empty.
    pub fn trim_to_regressions(&mut self) {
        self.children.retain(|_, node| match node {
            TrieNode::Leaf(leaf) => leaf.is_regression,
            TrieNode::Dir(dir) => {
                dir.trim_to_regressions();
                !dir.is_empty()
            }
        });
    }
}

/// The results for a single test across all of its attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestLeaf {
    /// The expected result types of the first attempt, space-separated.
    pub expected: String,

    /// The actual result type of every attempt, space-separated, in attempt order.
    pub actual: String,

    /// The shard the test ran in, if sharding was configured.
    #[serde(default)]
    pub shard: Option<usize>,

    /// True if the attempts produced more than one distinct result type.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_flaky: bool,

    /// The duration of the first attempt in seconds, rounded to a tenth of a second. Absent if
    /// zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,

    /// True if the test is marked slow.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_slow_test: bool,

    /// True if the last attempt was unexpected.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_unexpected: bool,

    /// True if the last attempt was an unexpected non-pass.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_regression: bool,

    /// Image comparison statistics from the first attempt, for reftests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_diff_stats: Option<ImageDiffStats>,

    /// Artifact paths by artifact ID, merged across attempts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Vec<String>>,

    /// True if any attempt produced diagnostic output.
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_stderr: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Summary statistics for an image comparison.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImageDiffStats {
    /// The largest difference in any single color channel.
    #[serde(rename = "maxDifference")]
    pub max_difference: u8,

    /// The number of pixels that differ.
    #[serde(rename = "maxPixels")]
    pub max_pixels: u64,
}

/// An error returned by [`TestTrie::insert`] when a test path collides with an existing node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrieInsertError {
    path: String,
    component: String,
}

impl TrieInsertError {
    fn new(path: &str, component: &str) -> Self {
        Self {
            path: path.to_owned(),
            component: component.to_owned(),
        }
    }

    /// The path that was being inserted.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for TrieInsertError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "test path `{}` conflicts with an existing entry at component `{}`",
            self.path, self.component
        )
    }
}

impl error::Error for TrieInsertError {}
