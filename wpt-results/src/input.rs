// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading the runner's JSON-lines event stream.

use crate::errors::{ExpectedError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::pin::Pin;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;
use wpt_results_processor::{errors::DisplayErrorChain, events::Event};

/// Where events are read from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum EventSource {
    Stdin,
    File(Utf8PathBuf),
}

impl EventSource {
    pub(crate) fn from_arg(arg: &Utf8Path) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::File(arg.to_owned())
        }
    }

    pub(crate) async fn open(&self) -> Result<EventReader> {
        let reader: Pin<Box<dyn AsyncBufRead + Send>> = match self {
            Self::Stdin => Box::pin(BufReader::new(tokio::io::stdin())),
            Self::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|err| {
                    ExpectedError::InputOpenError {
                        path: path.clone(),
                        err,
                    }
                })?;
                Box::pin(BufReader::new(file))
            }
        };
        Ok(EventReader::new(reader))
    }
}

/// Parses events line by line. Malformed lines, including ones that are not UTF-8, are logged
/// and skipped.
pub(crate) struct EventReader {
    reader: Pin<Box<dyn AsyncBufRead + Send>>,
    // Holds a partially read line across cancelled calls.
    buf: Vec<u8>,
    line_no: usize,
}

impl EventReader {
    pub(crate) fn new(reader: Pin<Box<dyn AsyncBufRead + Send>>) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
        }
    }

    /// Returns the next event, or `None` at the end of the stream.
    ///
    /// Cancel safe: bytes of a partially read line are kept until the line is complete.
    pub(crate) async fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            self.reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|err| ExpectedError::InputReadError { err })?;
            if self.buf.is_empty() {
                return Ok(None);
            }
            self.line_no += 1;
            let line = match String::from_utf8(std::mem::take(&mut self.buf)) {
                Ok(line) => line,
                Err(error) => {
                    warn!(
                        "skipping line {} of event stream: {}",
                        self.line_no,
                        DisplayErrorChain::new(error)
                    );
                    continue;
                }
            };
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            match Event::parse(line) {
                Ok(event) => return Ok(Some(event)),
                Err(error) => {
                    warn!(
                        "skipping line {} of event stream: {}",
                        self.line_no,
                        DisplayErrorChain::new(error)
                    );
                }
            }
        }
    }
}
