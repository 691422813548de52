// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable output of the WPT results processor.
//!
//! This crate contains the data formats consumed by dashboards and other
//! tooling: the [`ResultType`] vocabulary, the `full_results.json` document
//! ([`FullResults`]) and the documented exit codes of the `wpt-results`
//! binary.

mod errors;
mod exit_codes;
mod full_results;
mod result_type;

pub use errors::*;
pub use exit_codes::*;
pub use full_results::*;
pub use result_type::*;
