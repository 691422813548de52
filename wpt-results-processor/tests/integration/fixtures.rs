// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use indoc::indoc;
use std::{fs, time::Duration};
use wpt_results_processor::{
    config::WptResultsConfig,
    events::Event,
    processor::ResultsProcessor,
    sink::{JsonLinesSink, ResultSink},
    stream::stream_results,
};

pub(crate) const FIXTURE_CONFIG: &str = indoc! {r#"
    [processor]
    test-name-prefix = "ninja://:blink_wpt_tests"

    [web-tests]
    wpt-manifest = "external/wpt/MANIFEST.json"
    internal-manifest = "wpt_internal/MANIFEST.json"
    baseline-search-path = ["platform/linux"]
    expectations-files = ["TestExpectations"]
    platform-tags = ["Linux", "Release"]

    [report]
    shard-index = 0
"#};

pub(crate) fn fixtures_dir() -> Utf8PathBuf {
    Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures/wpt-results")
}

/// A scratch copy of the fixture web tests, plus an output directory.
pub(crate) struct TempRun {
    // Held for its Drop impl.
    _dir: Utf8TempDir,
    root: Utf8PathBuf,
}

impl TempRun {
    pub(crate) fn new() -> Self {
        let dir = camino_tempfile::Builder::new()
            .prefix("wpt-results-fixture-")
            .tempdir()
            .unwrap();
        let root = dir.path().to_owned();
        copy_dir_all(&fixtures_dir().join("web_tests"), &root.join("web_tests"));
        Self { _dir: dir, root }
    }

    pub(crate) fn web_tests_dir(&self) -> Utf8PathBuf {
        self.root.join("web_tests")
    }

    pub(crate) fn artifacts_dir(&self) -> Utf8PathBuf {
        self.root.join("out/layout-test-results")
    }

    pub(crate) fn sink_output(&self) -> Utf8PathBuf {
        self.root.join("out/sink.jsonl")
    }

    /// Returns the fixture config with paths pointed at this run.
    pub(crate) fn config(&self) -> WptResultsConfig {
        let (mut config, unknown) = WptResultsConfig::from_toml(FIXTURE_CONFIG).unwrap();
        assert!(unknown.is_empty(), "unknown config keys: {unknown:?}");
        config.web_tests.dir = self.web_tests_dir();
        config.processor.artifacts_dir = self.artifacts_dir();
        config
    }

    pub(crate) fn sink(&self) -> Box<dyn ResultSink> {
        fs::create_dir_all(self.root.join("out")).unwrap();
        Box::new(JsonLinesSink::create(&self.sink_output()).unwrap())
    }

    pub(crate) fn read_artifact(&self, path: &str) -> Vec<u8> {
        fs::read(self.artifacts_dir().join(path))
            .unwrap_or_else(|error| panic!("reading artifact {path}: {error}"))
    }
}

pub(crate) fn recorded_events() -> Vec<Event> {
    let contents = fs::read_to_string(fixtures_dir().join("events/run.jsonl")).unwrap();
    contents
        .lines()
        .map(|line| Event::parse(line).unwrap())
        .collect()
}

/// Streams `events` through a processor and returns it once the stream has shut down.
pub(crate) async fn run_events(processor: ResultsProcessor, events: Vec<Event>) -> ResultsProcessor {
    let (sender, stream) = stream_results(processor);
    for event in events {
        assert!(sender.send(event), "consumer stopped early");
    }
    stream.finish(Duration::from_secs(60)).await.unwrap()
}

fn copy_dir_all(src: &Utf8Path, dst: &Utf8Path) {
    fs::create_dir_all(dst).unwrap();
    for entry in src.read_dir_utf8().unwrap() {
        let entry = entry.unwrap();
        let dest = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir_all(entry.path(), &dest);
        } else {
            fs::copy(entry.path(), &dest).unwrap();
        }
    }
}
