// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and command routing.

use crate::{
    errors::{ExpectedError, Result},
    input::EventSource,
    output::{OutputContext, OutputOpts},
    signal::SignalHandler,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing::{info, warn};
use wpt_results_metadata::WptResultsExitCode;
use wpt_results_processor::{
    config::WptResultsConfig,
    errors::StreamError,
    processor::ResultsProcessor,
    report::ResultsWriter,
    sink::{JsonLinesSink, NoopSink, ResultSink},
    stream::stream_results,
    threshold::{Threshold, ThresholdExceeded},
    wpt_report::process_wpt_report,
};

/// Turns a web-platform-tests event stream into Chromium web test results.
#[derive(Debug, Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100
)]
pub struct WptResultsApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl WptResultsApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self) -> Result<i32> {
        match self.command {
            Command::Process(opts) => (*opts).exec(),
            Command::MergeWptReport(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process a mozlog JSON-lines event stream
    ///
    /// Events are read one per line, from a file or standard input. Results are written into the
    /// artifacts directory when the stream ends.
    Process(Box<ProcessOpts>),

    /// Merge a multi-line wptreport into the artifacts directory
    MergeWptReport(MergeWptReportOpts),
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: .config/wpt-results.toml under the working directory]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Directory to write artifacts and reports into
    #[arg(long, value_name = "DIR")]
    artifacts_dir: Option<Utf8PathBuf>,

    /// Write result sink records to this file, one JSON object per line
    #[arg(long, value_name = "PATH")]
    sink_output: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn load(&self) -> Result<WptResultsConfig> {
        let mut config =
            WptResultsConfig::from_sources(Utf8Path::new("."), self.config_file.as_deref())?;
        if let Some(dir) = &self.artifacts_dir {
            config.processor.artifacts_dir = dir.clone();
        }
        if let Some(path) = &self.sink_output {
            config.report.sink_output = Some(path.clone());
        }
        Ok(config)
    }
}

fn make_sink(config: &WptResultsConfig) -> Result<Box<dyn ResultSink>> {
    match &config.report.sink_output {
        Some(path) => {
            let sink = JsonLinesSink::create(path).map_err(|err| ExpectedError::SinkCreateError {
                path: path.clone(),
                err,
            })?;
            Ok(Box::new(sink))
        }
        None => Ok(Box::new(NoopSink)),
    }
}

fn make_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ExpectedError::TokioRuntimeCreateError { err })
}

#[derive(Debug, Args)]
struct ProcessOpts {
    /// Event stream to read, or `-` for standard input
    #[arg(long, value_name = "PATH", default_value = "-")]
    events: Utf8PathBuf,

    #[clap(flatten)]
    config: ConfigOpts,

    /// Web tests directory
    #[arg(long, value_name = "DIR")]
    web_tests_dir: Option<Utf8PathBuf>,

    /// Prefix for test IDs reported to the result sink
    #[arg(long, value_name = "PREFIX")]
    test_name_prefix: Option<String>,

    /// Abort after this many unexpected failures, or `unbounded`
    #[arg(long, value_name = "N")]
    failure_threshold: Option<Threshold>,

    /// Abort after this many unexpected crashes and timeouts, or `unbounded`
    #[arg(long, value_name = "N")]
    crash_timeout_threshold: Option<Threshold>,

    /// Rewrite baselines from the observed results
    #[arg(long)]
    reset_results: bool,

    /// Additional platform tag for TestExpectations filtering (can be repeated)
    #[arg(long = "platform-tag", value_name = "TAG")]
    platform_tags: Vec<String>,

    /// Shard index recorded in the results
    #[arg(long, value_name = "INDEX")]
    shard_index: Option<usize>,

    /// Name of the flag-specific configuration
    #[arg(long, value_name = "NAME")]
    flag_name: Option<String>,

    /// Also copy full_results.json to this path
    #[arg(long, value_name = "PATH")]
    json_test_results: Option<Utf8PathBuf>,

    /// Runner wptreport to merge into the artifacts directory after processing
    #[arg(long, value_name = "PATH")]
    wpt_report: Option<Utf8PathBuf>,
}

/// How the event stream ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RunEnd {
    Completed,
    Interrupted,
    ThresholdExceeded(ThresholdExceeded),
}

impl RunEnd {
    /// Folds in a threshold the consumer hit after the loop stopped watching for it, such as
    /// while draining the queue after end of input.
    fn with_threshold(self, exceeded: Option<ThresholdExceeded>) -> Self {
        match exceeded {
            Some(exceeded) => Self::ThresholdExceeded(exceeded),
            None => self,
        }
    }

    fn is_interrupted(self) -> bool {
        self != Self::Completed
    }

    fn exit_code(self, num_regressions: usize) -> i32 {
        match self {
            Self::ThresholdExceeded(exceeded) => {
                warn!("run aborted after too many unexpected {exceeded}, results are incomplete");
                WptResultsExitCode::THRESHOLD_EXCEEDED
            }
            Self::Interrupted => WptResultsExitCode::INTERRUPTED,
            Self::Completed if num_regressions > 0 => WptResultsExitCode::REGRESSIONS,
            Self::Completed => WptResultsExitCode::OK,
        }
    }
}

fn finish_error(error: StreamError) -> ExpectedError {
    match error {
        StreamError::ShutdownTimeout { timeout } => ExpectedError::StreamShutdownTimeout { timeout },
        StreamError::Fatal(err) => ExpectedError::InvalidRunnerStatus { err },
        StreamError::ConsumerPanicked(error) => std::panic::resume_unwind(error.into_panic()),
        err => ExpectedError::ResultsStreamError { err },
    }
}

impl ProcessOpts {
    fn exec(self) -> Result<i32> {
        let config = self.make_config()?;
        let sink = make_sink(&config)?;
        let processor = ResultsProcessor::new(&config, sink)?;
        let runtime = make_runtime()?;
        runtime.block_on(self.run(processor, config.processor.shutdown_timeout))
    }

    fn make_config(&self) -> Result<WptResultsConfig> {
        let mut config = self.config.load()?;
        if let Some(dir) = &self.web_tests_dir {
            config.web_tests.dir = dir.clone();
        }
        if let Some(prefix) = &self.test_name_prefix {
            config.processor.test_name_prefix = prefix.clone();
        }
        if let Some(threshold) = self.failure_threshold {
            config.processor.failure_threshold = threshold;
        }
        if let Some(threshold) = self.crash_timeout_threshold {
            config.processor.crash_timeout_threshold = threshold;
        }
        config.processor.reset_results |= self.reset_results;
        config
            .web_tests
            .platform_tags
            .extend(self.platform_tags.iter().cloned());
        if self.shard_index.is_some() {
            config.report.shard_index = self.shard_index;
        }
        if self.flag_name.is_some() {
            config.report.flag_name = self.flag_name.clone();
        }
        Ok(config)
    }

    async fn run(&self, processor: ResultsProcessor, shutdown_timeout: Duration) -> Result<i32> {
        let mut signals =
            SignalHandler::new().map_err(|err| ExpectedError::SignalHandlerSetupError { err })?;
        let mut reader = EventSource::from_arg(&self.events).open().await?;
        let (sender, mut stream) = stream_results(processor);

        let mut threshold_armed = true;
        let mut input_error = None;
        let run_end = loop {
            tokio::select! {
                event = reader.next_event() => {
                    match event {
                        Ok(Some(event)) => {
                            if !sender.send(event) {
                                // The consumer stopped; finishing the stream reports why.
                                break RunEnd::Completed;
                            }
                        }
                        Ok(None) => break RunEnd::Completed,
                        Err(error) => {
                            input_error = Some(error);
                            break RunEnd::Interrupted;
                        }
                    }
                }
                Some(signal) = signals.recv() => {
                    warn!("received {signal}, stopping");
                    break RunEnd::Interrupted;
                }
                exceeded = stream.threshold_exceeded(), if threshold_armed => {
                    match exceeded {
                        Some(exceeded) => break RunEnd::ThresholdExceeded(exceeded),
                        None => threshold_armed = false,
                    }
                }
            }
        };

        let processor = stream.finish(shutdown_timeout).await.map_err(finish_error)?;
        let run_end = run_end.with_threshold(processor.threshold_exceeded());

        let num_regressions = self.write_reports(processor, run_end.is_interrupted())?;
        if let Some(error) = input_error {
            return Err(error);
        }
        Ok(run_end.exit_code(num_regressions))
    }

    /// Writes the final reports, returning the number of regressions.
    fn write_reports(&self, mut processor: ResultsProcessor, interrupted: bool) -> Result<usize> {
        let artifacts_dir = processor.artifacts_dir().to_owned();
        let results = processor.full_results(interrupted, Utc::now());
        ResultsWriter::new(&artifacts_dir).write(&results, self.json_test_results.as_deref())?;
        info!(
            "processed {} tests ({} regressions), results written to {artifacts_dir}",
            processor.history().len(),
            results.num_regressions,
        );

        if let Some(report) = &self.wpt_report {
            process_wpt_report(report, &artifacts_dir, processor.sink_mut())?;
        }
        Ok(results.num_regressions)
    }
}

#[derive(Debug, Args)]
struct MergeWptReportOpts {
    /// The wptreport written by the runner
    #[arg(value_name = "REPORT")]
    report: Utf8PathBuf,

    #[clap(flatten)]
    config: ConfigOpts,
}

impl MergeWptReportOpts {
    fn exec(self) -> Result<i32> {
        let config = self.config.load()?;
        let mut sink = make_sink(&config)?;
        let dest = process_wpt_report(
            &self.report,
            &config.processor.artifacts_dir,
            sink.as_mut(),
        )?;
        info!("merged wptreport written to {dest}");
        Ok(WptResultsExitCode::OK)
    }
}
