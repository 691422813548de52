// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that run a recorded event stream against the fixture web tests tree.
//!
//! The fixtures live in `fixtures/wpt-results` at the workspace root:
//!
//! - `web_tests/` is a miniature Chromium web tests directory, with WPT manifests, a
//!   platform-specific baseline directory and a TestExpectations file.
//! - `events/run.jsonl` is a two-iteration run against those tests.

mod fixtures;
mod reset_results;
mod stream_run;
mod thresholds;
