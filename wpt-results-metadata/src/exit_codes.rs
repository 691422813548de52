// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `wpt-results` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum WptResultsExitCode {}

impl WptResultsExitCode {
    /// The event stream was processed and no regressions were found.
    pub const OK: i32 = 0;

    /// The event stream was processed and at least one test regressed.
    pub const REGRESSIONS: i32 = 100;

    /// A user issue happened while setting up the processor: bad configuration, an unreadable
    /// manifest or a malformed TestExpectations file.
    pub const SETUP_ERROR: i32 = 96;

    /// The test runner reported a status string outside the known status vocabulary.
    pub const INVALID_RUNNER_STATUS: i32 = 97;

    /// The results stream did not drain within the shutdown timeout.
    pub const STREAM_SHUTDOWN_TIMEOUT: i32 = 98;

    /// Reading the event stream produced an error.
    pub const INPUT_READ_ERROR: i32 = 99;

    /// Writing reports or artifacts produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// Merging a wptreport produced an error.
    pub const WPT_REPORT_MERGE_FAILED: i32 = 111;

    /// The run was interrupted by a signal. Reports were still written, marked as interrupted.
    pub const INTERRUPTED: i32 = 130;

    /// Too many unexpected failures, crashes or timeouts were seen and the run was aborted.
    /// Reports were still written, marked as interrupted.
    pub const THRESHOLD_EXCEEDED: i32 = 140;
}
