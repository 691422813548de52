// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text diffs between expected and actual baselines.

use similar::{ChangeTag, TextDiff};
use swrite::{SWrite, swrite};

/// Produces a unified diff from `expected` to `actual`.
pub fn unified_diff(expected: &str, actual: &str, expected_name: &str, actual_name: &str) -> String {
    TextDiff::from_lines(expected, actual)
        .unified_diff()
        .context_radius(3)
        .header(expected_name, actual_name)
        .to_string()
}

/// Produces a standalone HTML page showing line-level changes from `expected` to `actual`.
pub fn html_diff(expected: &str, actual: &str) -> String {
    let mut out = String::from(
        "<html>\n<head>\n<style>\
         .del { background: #faa; }\
         .add { background: #afa; }\
         </style>\n</head>\n<body>\n<pre>",
    );
    let diff = TextDiff::from_lines(expected, actual);
    for change in diff.iter_all_changes() {
        let line = escape_html(change.value());
        match change.tag() {
            ChangeTag::Equal => out.push_str(&line),
            ChangeTag::Delete => swrite!(out, "<span class=\"del\">{line}</span>"),
            ChangeTag::Insert => swrite!(out, "<span class=\"add\">{line}</span>"),
        }
    }
    out.push_str("</pre>\n</body>\n</html>\n");
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
