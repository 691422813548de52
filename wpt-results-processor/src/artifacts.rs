// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-attempt artifacts: files written next to the results and referenced from them.

use crate::{
    diff::{html_diff, unified_diff},
    errors::ArtifactWriteError,
    events::ReftestScreenshot,
    image_diff::diff_images,
    result::WptResult,
    web_tests::{WebTestsLayout, output_filename, split_virtual, strip_wpt_prefix},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::{collections::BTreeMap, fs};
use tracing::{error, warn};
use wpt_results_metadata::{ImageDiffStats, ResultType};

/// Artifact IDs mapped to the paths recorded for them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ArtifactMap {
    inner: BTreeMap<String, Vec<String>>,
}

impl ArtifactMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a path for an artifact ID. Duplicate paths are ignored.
    pub fn add(&mut self, id: impl Into<String>, path: impl Into<String>) {
        let paths = self.inner.entry(id.into()).or_default();
        let path = path.into();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    /// Returns true if an artifact with this ID was recorded.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    /// Returns the paths recorded for an artifact ID.
    pub fn get(&self, id: &str) -> Option<&[String]> {
        self.inner.get(id).map(Vec::as_slice)
    }

    /// Returns true if no artifacts were recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over artifact IDs and their paths, sorted by ID.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.inner
            .iter()
            .map(|(id, paths)| (id.as_str(), paths.as_slice()))
    }

    /// Merges another map into this one.
    pub fn merge(&mut self, other: &ArtifactMap) {
        for (id, paths) in other.iter() {
            for path in paths {
                self.add(id, path.as_str());
            }
        }
    }

    /// Converts into the plain map stored in `full_results.json`.
    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.inner
    }
}

/// The artifacts directory, for example `out/layout-test-results`.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    artifacts_dir: Utf8PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `artifacts_dir`.
    pub fn new(artifacts_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Returns the artifacts directory.
    pub fn artifacts_dir(&self) -> &Utf8Path {
        &self.artifacts_dir
    }

    /// Returns the directory that recorded artifact paths are relative to.
    pub fn output_root(&self) -> &Utf8Path {
        self.artifacts_dir.parent().unwrap_or(Utf8Path::new(""))
    }

    /// Starts writing artifacts for one attempt of a test.
    pub fn attempt(&self, iteration: usize) -> AttemptArtifacts<'_> {
        AttemptArtifacts {
            store: self,
            iteration,
            map: ArtifactMap::new(),
        }
    }

    fn base_name(&self) -> &str {
        self.artifacts_dir.file_name().unwrap_or("")
    }
}

/// Artifacts written for a single attempt.
#[derive(Debug)]
pub struct AttemptArtifacts<'a> {
    store: &'a ArtifactStore,
    iteration: usize,
    map: ArtifactMap,
}

impl AttemptArtifacts<'_> {
    /// Writes `contents` to `subpath` and records it under `id`.
    ///
    /// Attempts after the first are placed under `retry_{iteration}/`.
    pub fn create(
        &mut self,
        id: &str,
        subpath: &Utf8Path,
        contents: &[u8],
    ) -> Result<(), ArtifactWriteError> {
        let rel = if self.iteration > 0 {
            Utf8PathBuf::from(format!("retry_{}", self.iteration)).join(subpath)
        } else {
            subpath.to_owned()
        };
        let path = self.store.artifacts_dir.join(&rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| ArtifactWriteError::new(parent, error))?;
        }
        fs::write(&path, contents).map_err(|error| ArtifactWriteError::new(&path, error))?;

        let recorded = Utf8Path::new(self.store.base_name()).join(&rel);
        self.map.add(id, recorded.into_string());
        Ok(())
    }

    /// Returns the artifacts recorded so far.
    pub fn finish(self) -> ArtifactMap {
        self.map
    }
}

/// Decides which artifacts a finished test attempt produces, and writes them.
#[derive(Debug)]
pub struct ArtifactExtractor {
    store: ArtifactStore,
    layout: WebTestsLayout,
    reset_results: bool,
}

impl ArtifactExtractor {
    /// Creates a new extractor.
    pub fn new(store: ArtifactStore, layout: WebTestsLayout, reset_results: bool) -> Self {
        Self {
            store,
            layout,
            reset_results,
        }
    }

    /// Returns the artifact store.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Writes the artifacts for `result` and attaches them to it.
    ///
    /// Text results and screenshots are only written for failures, or for every result when
    /// resetting baselines. Diagnostics and the pending crash log (which is drained) are always
    /// written. Write failures are logged and skipped.
    pub fn extract(
        &self,
        result: &mut WptResult,
        iteration: usize,
        screenshots: &[ReftestScreenshot],
        crash_log: &mut Vec<String>,
    ) {
        let mut attempt = self.store.attempt(iteration);
        let mut image_diff_stats = None;
        let name = result.name().to_owned();

        if self.reset_results || result.actual() == ResultType::Failure {
            if result.can_have_subtests() {
                self.write_text_results(result, iteration, &mut attempt);
            }
            if !screenshots.is_empty() {
                image_diff_stats = write_screenshots(&name, screenshots, &mut attempt);
            }
        }

        let messages = result.take_messages();
        if !messages.is_empty() {
            write_log(&name, "stderr", "-stderr", &messages, &mut attempt);
        }
        if !crash_log.is_empty() {
            write_log(&name, "crash_log", "-crash-log", crash_log, &mut attempt);
            crash_log.clear();
        }

        result.set_artifacts(attempt.finish(), image_diff_stats);
    }

    fn write_text_results(
        &self,
        result: &WptResult,
        iteration: usize,
        attempt: &mut AttemptArtifacts<'_>,
    ) {
        let name = result.name();
        let actual_subpath = output_filename(name, "-actual", ".txt");
        let expected_subpath = output_filename(name, "-expected", ".txt");

        let actual_text = result.format_baseline();
        create_logged(attempt, "actual_text", &actual_subpath, actual_text.as_bytes());

        if self.reset_results
            && iteration == 0
            && !matches!(result.actual(), ResultType::Crash | ResultType::Timeout)
        {
            let dest = self.layout.baseline_version_dir().join(&expected_subpath);
            if let Err(error) = write_file(&dest, actual_text.as_bytes()) {
                warn!("failed to reset baseline for {name}: {error}");
            }
        }

        let Some(expected_text) = result
            .wpt()
            .baseline_text
            .as_deref()
            .map(|text| format!("{}\n", text.trim()))
        else {
            return;
        };
        create_logged(
            attempt,
            "expected_text",
            &expected_subpath,
            expected_text.as_bytes(),
        );

        let diff = unified_diff(
            &expected_text,
            &actual_text,
            expected_subpath.as_str(),
            actual_subpath.as_str(),
        );
        create_logged(
            attempt,
            "text_diff",
            &output_filename(name, "-diff", ".txt"),
            diff.as_bytes(),
        );
        let html = html_diff(&expected_text, &actual_text);
        create_logged(
            attempt,
            "pretty_text_diff",
            &output_filename(name, "-pretty-diff", ".html"),
            html.as_bytes(),
        );
    }
}

fn write_screenshots(
    test: &str,
    screenshots: &[ReftestScreenshot],
    attempt: &mut AttemptArtifacts<'_>,
) -> Option<ImageDiffStats> {
    let (_, base) = split_virtual(test);
    let test_url = strip_wpt_prefix(base);
    let mut actual_image = None;
    let mut expected_image = None;

    for screenshot in screenshots {
        let ReftestScreenshot::Image { url, screenshot } = screenshot else {
            continue;
        };
        let url = url.strip_prefix('/').unwrap_or(url);
        let bytes = match STANDARD.decode(screenshot.trim()) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!("{test}: skipping screenshot of {url} with invalid base64: {error}");
                continue;
            }
        };

        let (id, suffix) = if url == test_url {
            ("actual_image", "-actual")
        } else {
            ("expected_image", "-expected")
        };
        create_logged(attempt, id, &output_filename(test, suffix, ".png"), &bytes);
        if url == test_url {
            actual_image = Some(bytes);
        } else {
            expected_image = Some(bytes);
        }
    }

    let (expected, actual) = (expected_image?, actual_image?);
    match diff_images(&expected, &actual) {
        Ok(Some(diff)) => {
            create_logged(
                attempt,
                "image_diff",
                &output_filename(test, "-diff", ".png"),
                &diff.png,
            );
            Some(diff.stats)
        }
        Ok(None) => None,
        Err(error) => {
            error!("error creating diff image for {test}: {error}");
            None
        }
    }
}

fn write_log(
    test: &str,
    id: &str,
    suffix: &str,
    lines: &[String],
    attempt: &mut AttemptArtifacts<'_>,
) {
    let contents = lines.concat();
    create_logged(
        attempt,
        id,
        &output_filename(test, suffix, ".txt"),
        contents.as_bytes(),
    );
}

fn create_logged(attempt: &mut AttemptArtifacts<'_>, id: &str, subpath: &Utf8Path, contents: &[u8]) {
    if let Err(error) = attempt.create(id, subpath, contents) {
        warn!("failed to write artifact `{id}`: {error}");
    }
}

fn write_file(path: &Utf8Path, contents: &[u8]) -> Result<(), ArtifactWriteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| ArtifactWriteError::new(parent, error))?;
    }
    fs::write(path, contents).map_err(|error| ArtifactWriteError::new(path, error))
}
