// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns the structured event stream of a web-platform-tests run into Chromium web test results.
//!
//! See the `wpt-results-processor` crate for the processing logic. This crate handles the command
//! line, logging, signals and exit codes.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod input;
mod output;
mod signal;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
