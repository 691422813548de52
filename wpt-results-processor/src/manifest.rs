// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test lookup in WPT `MANIFEST.json` files.

use crate::{
    errors::{ManifestLoadError, ManifestLoadErrorKind},
    status::TestType,
};
use camino::Utf8Path;
use serde::{Deserialize, de::Error as _};
use serde_json::{Map, Value};
use std::{collections::HashMap, fs};

/// The manifest format version this module understands.
pub const MANIFEST_VERSION: u64 = 8;

/// A test found in a manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestTest {
    /// The test type.
    pub test_type: TestType,

    /// The source file, relative to the manifest root.
    pub path: String,
}

/// A loaded WPT manifest, indexed by test URL.
#[derive(Clone, Debug, Default)]
pub struct WptManifest {
    tests: HashMap<String, ManifestTest>,
}

#[derive(Deserialize)]
struct RawManifest {
    version: u64,
    #[serde(default)]
    items: Map<String, Value>,
}

impl WptManifest {
    /// Loads a manifest from disk.
    pub fn load(path: &Utf8Path) -> Result<Self, ManifestLoadError> {
        let contents = fs::read_to_string(path)
            .map_err(|error| ManifestLoadError::new(path, ManifestLoadErrorKind::Read(error)))?;
        Self::from_json(&contents).map_err(|kind| ManifestLoadError::new(path, kind))
    }

    /// Parses a manifest from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, ManifestLoadErrorKind> {
        let raw: RawManifest = serde_json::from_str(json).map_err(ManifestLoadErrorKind::Parse)?;
        if raw.version != MANIFEST_VERSION {
            return Err(ManifestLoadErrorKind::UnsupportedVersion {
                found: raw.version,
                supported: MANIFEST_VERSION,
            });
        }

        let mut tests = HashMap::new();
        for (type_name, tree) in &raw.items {
            // Support files, manual tests and the like are not run.
            let Ok(test_type) = type_name.parse::<TestType>() else {
                continue;
            };
            let Value::Object(tree) = tree else {
                return Err(shape_error(type_name));
            };
            collect(test_type, "", tree, &mut tests)?;
        }
        Ok(Self { tests })
    }

    /// Looks up a test by URL, relative to the manifest root.
    ///
    /// A leading `/` is ignored.
    pub fn get(&self, url: &str) -> Option<&ManifestTest> {
        self.tests.get(url.strip_prefix('/').unwrap_or(url))
    }

    /// Returns the number of tests in the manifest.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if the manifest has no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

// Directories are objects. Files are arrays of `[hash, [url | null, ...extras], ...]`, where a
// null URL means the file's own path.
fn collect(
    test_type: TestType,
    prefix: &str,
    tree: &Map<String, Value>,
    tests: &mut HashMap<String, ManifestTest>,
) -> Result<(), ManifestLoadErrorKind> {
    for (name, node) in tree {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match node {
            Value::Object(children) => collect(test_type, &path, children, tests)?,
            Value::Array(items) => {
                for item in items.iter().skip(1) {
                    let url = match item.as_array().and_then(|item| item.first()) {
                        Some(Value::String(url)) => url.strip_prefix('/').unwrap_or(url).to_owned(),
                        Some(Value::Null) => path.clone(),
                        _ => return Err(shape_error(&path)),
                    };
                    tests.insert(
                        url,
                        ManifestTest {
                            test_type,
                            path: path.clone(),
                        },
                    );
                }
            }
            _ => return Err(shape_error(&path)),
        }
    }
    Ok(())
}

fn shape_error(path: &str) -> ManifestLoadErrorKind {
    ManifestLoadErrorKind::Parse(serde_json::Error::custom(format!(
        "unexpected manifest entry at `{path}`"
    )))
}
