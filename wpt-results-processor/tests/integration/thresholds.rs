// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{TempRun, recorded_events, run_events};
use chrono::DateTime;
use pretty_assertions::assert_eq;
use std::{num::NonZeroUsize, time::Duration};
use wpt_results_processor::{
    events::EventKind,
    processor::ResultsProcessor,
    stream::stream_results,
    threshold::{Threshold, ThresholdExceeded},
};

fn count(count: usize) -> Threshold {
    Threshold::Count(NonZeroUsize::new(count).unwrap())
}

#[tokio::test]
async fn failure_threshold_signals_once() {
    let run = TempRun::new();
    let mut config = run.config();
    config.processor.failure_threshold = count(1);
    let processor = ResultsProcessor::new(&config, run.sink()).unwrap();

    let (sender, mut stream) = stream_results(processor);
    for event in recorded_events() {
        assert!(sender.send(event));
    }

    // Node-cloneNode.html is tolerated; align-content-001.html is one failure too many.
    assert_eq!(
        stream.threshold_exceeded().await,
        Some(ThresholdExceeded::Failures)
    );
    assert_eq!(stream.threshold_exceeded().await, None);

    let processor = stream.finish(Duration::from_secs(60)).await.unwrap();
    assert_eq!(
        processor.threshold_exceeded(),
        Some(ThresholdExceeded::Failures)
    );
    // Exceeding a threshold doesn't stop processing: the caller decides when to stop sending.
    assert_eq!(processor.history().len(), 7);
}

#[tokio::test]
async fn expected_crashes_do_not_count() {
    let run = TempRun::new();
    let mut config = run.config();
    config.processor.crash_timeout_threshold = count(1);
    let processor = ResultsProcessor::new(&config, run.sink()).unwrap();

    // The recorded crash and timeout are both expected.
    let processor = run_events(processor, recorded_events()).await;
    assert_eq!(processor.threshold_exceeded(), None);
}

#[tokio::test]
async fn interrupted_run_leaves_stranded_tests() {
    let run = TempRun::new();
    let processor = ResultsProcessor::new(&run.config(), run.sink()).unwrap();

    // Stop right after the reftest starts.
    let mut events = recorded_events();
    let reftest_start = events
        .iter()
        .position(|event| {
            matches!(
                &event.kind,
                EventKind::TestStart(start) if start.test == "/css/css-flexbox/align-content-001.html"
            )
        })
        .unwrap();
    events.truncate(reftest_start + 1);

    let processor = run_events(processor, events).await;
    assert_eq!(
        processor.running_tests().collect::<Vec<_>>(),
        ["external/wpt/css/css-flexbox/align-content-001.html"]
    );

    let results = processor.full_results(true, DateTime::UNIX_EPOCH);
    assert!(results.interrupted);
    assert!(
        results
            .tests
            .get("external/wpt/css/css-flexbox/align-content-001.html")
            .is_none(),
        "stranded tests are not reported"
    );
    assert_eq!(results.tests.leaves().len(), 4);
    assert_eq!(results.num_regressions, 1, "Node-cloneNode.html never got its retry");
}
