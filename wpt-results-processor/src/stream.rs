// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A queue between event producers and the single results consumer.
//!
//! Producers push events into an unbounded queue and never block. A blocking task owns the
//! [`ResultsProcessor`] and handles events one at a time, in arrival order.

use crate::{
    errors::{DisplayErrorChain, ProcessEventError, StreamError, UnknownStatusError},
    events::Event,
    processor::{EventResponse, ResultsProcessor},
    threshold::ThresholdExceeded,
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{error, warn};

/// Starts consuming events on a blocking task.
///
/// Must be called from within a Tokio runtime.
pub fn stream_results(processor: ResultsProcessor) -> (EventSender, ResultsStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let (threshold_tx, threshold_rx) = oneshot::channel();
    let handle = tokio::task::spawn_blocking(move || consume(processor, receiver, threshold_tx));

    (
        EventSender {
            sender: sender.clone(),
        },
        ResultsStream {
            sender,
            handle,
            threshold_rx: Some(threshold_rx),
        },
    )
}

fn consume(
    mut processor: ResultsProcessor,
    mut receiver: mpsc::UnboundedReceiver<Event>,
    threshold_tx: oneshot::Sender<ThresholdExceeded>,
) -> Result<ResultsProcessor, UnknownStatusError> {
    let mut threshold_tx = Some(threshold_tx);
    while let Some(event) = receiver.blocking_recv() {
        let action = event.action.clone();
        let test = event.kind.test().map(str::to_owned);
        let time = event.time;
        match processor.process_event(event) {
            Ok(EventResponse::Continue) => {}
            Ok(EventResponse::Shutdown) => break,
            Ok(EventResponse::ThresholdExceeded(exceeded)) => {
                if let Some(tx) = threshold_tx.take() {
                    // The receiver may have been dropped, in which case nobody is listening.
                    _ = tx.send(exceeded);
                }
            }
            Err(ProcessEventError::Processing(error)) => {
                warn!(
                    action = %action,
                    test = test.as_deref().unwrap_or("-"),
                    time,
                    "error processing `{action}` event: {}",
                    DisplayErrorChain::new(error),
                );
            }
            Err(ProcessEventError::Fatal(error)) => {
                error!(
                    action = %action,
                    test = test.as_deref().unwrap_or("-"),
                    time,
                    "stopping results stream after `{action}` event: {}",
                    DisplayErrorChain::new(&error)
                );
                return Err(error);
            }
        }
    }
    Ok(processor)
}

/// The producer half of a results stream.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Queues an event without blocking.
    ///
    /// Returns false if the consumer has stopped, in which case the event is dropped.
    pub fn send(&self, event: Event) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// The consumer half of a results stream.
#[derive(Debug)]
pub struct ResultsStream {
    sender: mpsc::UnboundedSender<Event>,
    handle: JoinHandle<Result<ResultsProcessor, UnknownStatusError>>,
    threshold_rx: Option<oneshot::Receiver<ThresholdExceeded>>,
}

impl ResultsStream {
    /// Waits until an abort threshold is exceeded.
    ///
    /// Returns `None` if the consumer stopped without exceeding a threshold, or if this already
    /// returned once.
    pub async fn threshold_exceeded(&mut self) -> Option<ThresholdExceeded> {
        let receiver = self.threshold_rx.as_mut()?;
        let exceeded = receiver.await.ok();
        self.threshold_rx = None;
        exceeded
    }

    /// Sends a `shutdown` event, then waits up to `timeout` for the consumer to drain the queue.
    ///
    /// Returns the processor, for building the final report.
    pub async fn finish(self, timeout: Duration) -> Result<ResultsProcessor, StreamError> {
        // If the consumer already stopped, the join below reports why.
        _ = self.sender.send(Event::shutdown());
        drop(self.sender);

        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(Ok(processor))) => Ok(processor),
            Ok(Ok(Err(error))) => Err(StreamError::Fatal(error)),
            Ok(Err(join_error)) => Err(StreamError::ConsumerPanicked(join_error)),
            Err(_) => Err(StreamError::ShutdownTimeout { timeout }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WptResultsConfig,
        events::{EventKind, TestEndEvent, TestStartEvent},
        sink::NoopSink,
        threshold::Threshold,
    };
    use camino_tempfile::Utf8TempDir;
    use std::num::NonZeroUsize;

    fn processor(dir: &Utf8TempDir, failure_threshold: Threshold) -> ResultsProcessor {
        let mut config = WptResultsConfig::default_config();
        config.processor.artifacts_dir = dir.path().join("layout-test-results");
        config.processor.failure_threshold = failure_threshold;
        config.web_tests.dir = dir.path().join("web_tests");
        ResultsProcessor::new(&config, Box::new(NoopSink)).unwrap()
    }

    fn events(test: &str, status: &str) -> [Event; 2] {
        [
            Event::new(EventKind::TestStart(TestStartEvent {
                test: test.to_owned(),
                subsuite: None,
            })),
            Event::new(EventKind::TestEnd(TestEndEvent {
                test: test.to_owned(),
                status: status.to_owned(),
                ..Default::default()
            })),
        ]
    }

    #[tokio::test]
    async fn drains_before_shutdown() {
        let dir = Utf8TempDir::new().unwrap();
        let (sender, stream) = stream_results(processor(&dir, Threshold::Unbounded));
        for index in 0..50 {
            for event in events(&format!("/t/{index}.html"), "OK") {
                assert!(sender.send(event));
            }
        }
        // A processing error does not stop the stream.
        assert!(sender.send(events("/t/never-started.html", "OK")[1].clone()));

        let processor = stream.finish(Duration::from_secs(30)).await.unwrap();
        assert_eq!(processor.history().len(), 50);
        assert!(!sender.send(Event::shutdown()), "consumer has stopped");
    }

    #[tokio::test]
    async fn threshold_is_signalled() {
        let dir = Utf8TempDir::new().unwrap();
        let threshold = Threshold::Count(NonZeroUsize::new(2).unwrap());
        let (sender, mut stream) = stream_results(processor(&dir, threshold));
        for index in 0..5 {
            for event in events(&format!("/t/{index}.html"), "ERROR") {
                sender.send(event);
            }
        }

        assert_eq!(
            stream.threshold_exceeded().await,
            Some(ThresholdExceeded::Failures)
        );
        assert_eq!(stream.threshold_exceeded().await, None);
        let processor = stream.finish(Duration::from_secs(30)).await.unwrap();
        assert_eq!(processor.threshold_exceeded(), Some(ThresholdExceeded::Failures));
    }

    #[tokio::test]
    async fn unknown_status_stops_stream() {
        let dir = Utf8TempDir::new().unwrap();
        let (sender, mut stream) = stream_results(processor(&dir, Threshold::Unbounded));
        for event in events("/t/a.html", "EXPLODED") {
            sender.send(event);
        }

        assert_eq!(stream.threshold_exceeded().await, None);
        match stream.finish(Duration::from_secs(30)).await {
            Err(StreamError::Fatal(error)) => {
                assert_eq!(error, UnknownStatusError::new("EXPLODED"));
            }
            other => panic!("expected a fatal error, found {other:?}"),
        }
    }
}
