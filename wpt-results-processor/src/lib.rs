// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for wpt-results: turning the structured event stream of a
//! web-platform-tests run into Chromium web test results.
//!
//! The basic flow is:
//!
//! 1. Build a [`ResultsProcessor`](processor::ResultsProcessor) from a
//!    [`WptResultsConfig`](config::WptResultsConfig).
//! 2. Hand it to [`stream_results`](stream::stream_results), and feed parsed
//!    [`Event`](events::Event)s into the returned sender.
//! 3. Finish the stream, then write the final report with
//!    [`ResultsWriter`](report::ResultsWriter).

pub mod artifacts;
pub mod baseline;
pub mod config;
mod diff;
pub mod errors;
pub mod events;
pub mod expectations;
pub mod image_diff;
pub mod manifest;
pub mod processor;
pub mod report;
pub mod result;
pub mod sink;
pub mod status;
pub mod stream;
pub mod threshold;
pub mod wpt_report;
