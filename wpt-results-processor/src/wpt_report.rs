// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging the runner's own wptreport.
//!
//! The runner writes one JSON report per line: the first line covers the initial run and each
//! later line covers a retry.

use crate::{
    errors::{WptReportMergeError, WriteReportError},
    report::write_atomic,
    sink::{InvocationArtifact, ResultSink},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fs};
use tracing::{debug, warn};

/// Merges the report at `report_path`, writes it into `artifacts_dir` under the same file name
/// and reports it to `sink`.
///
/// Returns the path of the merged report.
pub fn process_wpt_report(
    report_path: &Utf8Path,
    artifacts_dir: &Utf8Path,
    sink: &mut dyn ResultSink,
) -> Result<Utf8PathBuf, WptReportMergeError> {
    let contents = fs::read_to_string(report_path).map_err(|error| WptReportMergeError::Read {
        path: report_path.to_owned(),
        error,
    })?;
    let report = merge_wpt_report(report_path, &contents)?;

    let file_name = report_path.file_name().unwrap_or("wpt_report.json");
    let dest = artifacts_dir.join(file_name);
    fs::create_dir_all(artifacts_dir).map_err(|error| WriteReportError::CreateDir {
        path: artifacts_dir.to_owned(),
        error,
    })?;
    let serialized = serde_json::to_string(&report).map_err(WriteReportError::Serialize)?;
    write_atomic(&dest, &[&serialized])?;
    debug!("wrote merged wptreport to {dest}");

    let artifacts = BTreeMap::from([(
        file_name.to_owned(),
        InvocationArtifact {
            file_path: dest.clone(),
        },
    )]);
    sink.report_invocation_artifacts(&artifacts);
    Ok(dest)
}

/// Merges a multi-line wptreport: the `results` of every later line are appended to the first.
pub fn merge_wpt_report(
    path: &Utf8Path,
    contents: &str,
) -> Result<Map<String, Value>, WptReportMergeError> {
    let mut lines = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<Map<String, Value>>(line).map_err(|error| {
                WptReportMergeError::Parse {
                    path: path.to_owned(),
                    line: index + 1,
                    error,
                }
            })
        });

    let mut report = lines.next().ok_or_else(|| WptReportMergeError::Empty {
        path: path.to_owned(),
    })??;
    let mut retries = 0;
    for retry in lines {
        let mut retry = retry?;
        retries += 1;
        let Some(Value::Array(retry_results)) = retry.remove("results") else {
            warn!("{path}: retry {retries} has no results");
            continue;
        };
        match report
            .entry("results")
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(results) => results.extend(retry_results),
            _ => warn!("{path}: `results` is not an array, dropping retry {retries}"),
        }
    }
    Ok(report)
}
