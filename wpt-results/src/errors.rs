// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::{error::Error, io, time::Duration};
use thiserror::Error;
use tracing::error;
use wpt_results_metadata::WptResultsExitCode;
use wpt_results_processor::errors::{
    ConfigParseError, ProcessorBuildError, StreamError, UnknownStatusError, WptReportMergeError,
    WriteReportError,
};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholder messages: errors are expected to be printed with
// display_to_stderr, which colorizes them.

/// An error that wpt-results knows how to report, each with its own exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("processor build error")]
    ProcessorBuildError {
        #[from]
        err: ProcessorBuildError,
    },
    #[error("failed to create sink output")]
    SinkCreateError {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },
    #[error("failed to create Tokio runtime")]
    TokioRuntimeCreateError {
        #[source]
        err: io::Error,
    },
    #[error("failed to set up signal handler")]
    SignalHandlerSetupError {
        #[source]
        err: io::Error,
    },
    #[error("failed to open event stream")]
    InputOpenError {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },
    #[error("failed to read event stream")]
    InputReadError {
        #[source]
        err: io::Error,
    },
    #[error("invalid runner status")]
    InvalidRunnerStatus {
        #[source]
        err: UnknownStatusError,
    },
    #[error("results stream shutdown timed out")]
    StreamShutdownTimeout { timeout: Duration },
    #[error("results stream failed")]
    ResultsStreamError {
        #[source]
        err: StreamError,
    },
    #[error("failed to write report")]
    WriteReportError {
        #[from]
        err: WriteReportError,
    },
    #[error("failed to merge wptreport")]
    WptReportMergeError {
        #[from]
        err: WptReportMergeError,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParseError { .. }
            | Self::ProcessorBuildError { .. }
            | Self::SinkCreateError { .. }
            | Self::TokioRuntimeCreateError { .. }
            | Self::SignalHandlerSetupError { .. } => WptResultsExitCode::SETUP_ERROR,
            Self::InputOpenError { .. }
            | Self::InputReadError { .. }
            | Self::ResultsStreamError { .. } => WptResultsExitCode::INPUT_READ_ERROR,
            Self::InvalidRunnerStatus { .. } => WptResultsExitCode::INVALID_RUNNER_STATUS,
            Self::StreamShutdownTimeout { .. } => WptResultsExitCode::STREAM_SHUTDOWN_TIMEOUT,
            Self::WriteReportError { .. } => WptResultsExitCode::WRITE_OUTPUT_ERROR,
            Self::WptReportMergeError { .. } => WptResultsExitCode::WPT_REPORT_MERGE_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ProcessorBuildError { err } => {
                error!("failed to set up results processor");
                Some(err as &dyn Error)
            }
            Self::SinkCreateError { path, err } => {
                error!(
                    "failed to create sink output at `{}`",
                    path.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::TokioRuntimeCreateError { err } => {
                error!("failed to create Tokio runtime");
                Some(err as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                error!("failed to set up signal handler");
                Some(err as &dyn Error)
            }
            Self::InputOpenError { path, err } => {
                error!("failed to open event stream `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::InputReadError { err } => {
                error!("failed to read event stream");
                Some(err as &dyn Error)
            }
            Self::InvalidRunnerStatus { err } => {
                error!(
                    "{err}: the runner and wpt-results disagree about the status vocabulary"
                );
                None
            }
            Self::StreamShutdownTimeout { timeout } => {
                error!("results stream did not shut down within {timeout:?}");
                None
            }
            Self::ResultsStreamError { err } => {
                error!("failed to process event stream");
                Some(err as &dyn Error)
            }
            Self::WriteReportError { err } => {
                error!("failed to write results");
                Some(err as &dyn Error)
            }
            Self::WptReportMergeError { err } => {
                error!("failed to merge wptreport");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
