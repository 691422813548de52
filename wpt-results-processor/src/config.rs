// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration for the results processor.

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    status::TestType,
    threshold::Threshold,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Overall configuration for wpt-results.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WptResultsConfig {
    /// How events are processed.
    pub processor: ProcessorConfig,

    /// Where tests, baselines and expectations live.
    pub web_tests: WebTestsConfig,

    /// What goes into the final report.
    pub report: ReportConfig,
}

/// The `[processor]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessorConfig {
    /// Where per-test artifacts are written.
    pub artifacts_dir: Utf8PathBuf,

    /// Prepended to test names when reporting to the result sink.
    pub test_name_prefix: String,

    /// Unexpected failures to tolerate before aborting.
    pub failure_threshold: Threshold,

    /// Unexpected crashes and timeouts to tolerate before aborting.
    pub crash_timeout_threshold: Threshold,

    /// Whether to rewrite baselines from the observed results.
    pub reset_results: bool,

    /// How long to wait for the queue to drain on shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Commands whose output is collected as a crash log.
    pub crash_log_executables: Vec<String>,
}

/// The `[web-tests]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebTestsConfig {
    /// The web tests directory.
    pub dir: Utf8PathBuf,

    /// The upstream WPT manifest, relative to `dir`.
    #[serde(default)]
    pub wpt_manifest: Option<Utf8PathBuf>,

    /// The `wpt_internal` manifest, relative to `dir`.
    #[serde(default)]
    pub internal_manifest: Option<Utf8PathBuf>,

    /// Baseline directories searched before `dir`, relative to `dir`.
    pub baseline_search_path: Vec<Utf8PathBuf>,

    /// TestExpectations files, relative to `dir`.
    pub expectations_files: Vec<Utf8PathBuf>,

    /// Tags describing the current platform.
    pub platform_tags: Vec<String>,

    /// The test type used when no manifest is configured.
    pub default_test_type: TestType,
}

impl WebTestsConfig {
    /// Resolves a path relative to the web tests directory.
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.dir.join(path)
    }
}

/// The `[report]` section.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportConfig {
    /// The shard index recorded in each test's results.
    #[serde(default)]
    pub shard_index: Option<usize>,

    /// The flag-specific configuration name.
    #[serde(default)]
    pub flag_name: Option<String>,

    /// Where to write sink records, if anywhere.
    #[serde(default)]
    pub sink_output: Option<Utf8PathBuf>,
}

impl WptResultsConfig {
    /// The path to the config file, relative to the working directory.
    pub const CONFIG_PATH: &'static str = ".config/wpt-results.toml";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config, layering `config_file` (or the file at [`Self::CONFIG_PATH`] under
    /// `root`, if it exists) over the defaults.
    ///
    /// Unknown keys are reported as warnings.
    pub fn from_sources(
        root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        for key in &unknown {
            warn!("ignoring unknown configuration key `{key}` in {config_file}");
        }
        Ok(config)
    }

    /// Parses the config from a TOML string layered over the defaults. Used for testing.
    pub fn from_toml(contents: &str) -> Result<(Self, BTreeSet<String>), ConfigParseErrorKind> {
        let builder =
            Self::make_default_config().add_source(File::from_str(contents, FileFormat::Toml));
        Self::build_and_deserialize_config(&builder)
    }

    /// Returns the default config.
    pub fn default_config() -> Self {
        let (config, _) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        config
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // serde_path_to_error already reports the key, so drop it from the config error.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

        Ok((config, ignored))
    }
}
