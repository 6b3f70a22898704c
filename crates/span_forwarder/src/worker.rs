//! Stream worker - the connection state machine
//!
//! Exactly one worker runs per forwarder. It owns the sender and performs
//! every sender call serially.
//!
//! ```text
//!            ┌────────────┐  ok   ┌───────────┐
//!     ┌────► │ Connecting │ ────► │ Streaming │ ◄──┐ Ok
//!     │      └────────────┘       └───────────┘ ───┘
//!     │            │ failure            │ failure / async outcome / shutdown
//!     │            ▼                    ▼
//!     │      ┌──────────────────────────────────┐
//!     │      │ outcome                          │
//!     │      │  Restart          → sleep backoff│──┐
//!     │      │  ImmediateRestart → (nothing)    │  │
//!     │      │  Reconnect        → shutdown +   │  │
//!     │      │                     clone        │  │
//!     │      │  Shutdown         → Terminated   │  │
//!     │      └──────────────────────────────────┘  │
//!     └────────────────────────────────────────────┘
//! ```
//!
//! No transport failure escapes the worker. Every failure is recorded as a
//! supportability metric and turned into a transition. A failed clone during
//! Reconnect ends the worker through the same terminal cleanup as Shutdown.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_single_completion;
use crate::error::StreamFailure;
use crate::metrics::MetricsHandle;
use crate::outcome::{METRIC_RESPONSE_ERROR, Outcome};
use crate::queue::SpanQueue;
use crate::sender::SpanSender;
use crate::shutdown::ShutdownSignals;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Whether the current sender still holds a connection to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    Live,
    Released,
}

pub(crate) struct StreamWorker<S: SpanSender> {
    sender: S,
    responses: Option<mpsc::Receiver<StreamFailure>>,
    queue: Arc<SpanQueue>,
    metrics: MetricsHandle,
    signals: Arc<ShutdownSignals>,
    backoff: Duration,
}

impl<S: SpanSender> StreamWorker<S> {
    pub(crate) fn new(
        sender: S,
        queue: Arc<SpanQueue>,
        metrics: MetricsHandle,
        signals: Arc<ShutdownSignals>,
        backoff: Duration,
    ) -> Self {
        Self {
            sender,
            responses: None,
            queue,
            metrics,
            signals,
            backoff,
        }
    }

    /// Runs until a terminal outcome, then performs cleanup exactly once.
    pub(crate) async fn run(mut self) {
        let state = self.drive().await;
        self.finish(state).await;
    }

    async fn drive(&mut self) -> SenderState {
        loop {
            if self.signals.stream_shutdown_requested() {
                return SenderState::Live;
            }

            let outcome = match self.sender.connect().await {
                Ok(()) => self.stream_batches().await,
                Err(failure) => {
                    record_failure(&self.metrics, self.sender.name(), &failure);
                    match failure.outcome {
                        Outcome::Ok => self.stream_batches().await,
                        outcome => outcome,
                    }
                }
            };

            match outcome {
                Outcome::Ok | Outcome::ImmediateRestart => {
                    tracing::debug!(sender = self.sender.name(), "restarting span stream");
                }
                Outcome::Restart => {
                    tracing::debug!(
                        sender = self.sender.name(),
                        backoff = ?self.backoff,
                        "backing off before reconnecting span stream"
                    );
                    if !back_off(self.backoff, &self.signals).await {
                        return SenderState::Live;
                    }
                }
                Outcome::Reconnect => {
                    self.sender.shutdown().await;
                    match self.sender.clone_sender() {
                        Ok(fresh) => {
                            tracing::debug!(sender = fresh.name(), "reconnecting span stream");
                            self.responses = None;
                            self.sender = fresh;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "span stream abandoned");
                            return SenderState::Released;
                        }
                    }
                }
                Outcome::Shutdown => return SenderState::Live,
            }
        }
    }

    /// Streams queued batches until something ends the connection.
    ///
    /// Never returns `Outcome::Ok`.
    async fn stream_batches(&mut self) -> Outcome {
        self.responses = self.sender.take_responses();
        tracing::debug!(sender = self.sender.name(), "span stream connected");

        loop {
            tokio::select! {
                biased;

                () = self.signals.stream_shutdown() => return Outcome::Shutdown,

                failure = next_response(&mut self.responses) => {
                    record_failure(&self.metrics, self.sender.name(), &failure);
                    if failure.outcome != Outcome::Ok {
                        return failure.outcome;
                    }
                }

                batch = self.queue.next_batch() => {
                    // Closed queue: producers are shut out, nothing left to stream.
                    let Some(batch) = batch else {
                        return Outcome::Shutdown;
                    };

                    let count = batch.count();
                    let result = self.sender.send(batch).await;
                    self.queue.acknowledge(count);

                    match result {
                        Ok(()) => self.metrics.increment_sent(count as f64),
                        Err(failure) => {
                            record_failure(&self.metrics, self.sender.name(), &failure);
                            if failure.outcome != Outcome::Ok {
                                return failure.outcome;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn finish(mut self, state: SenderState) {
        // Shut producers out: the next enqueue drains and closes the queue.
        self.signals.request_stream_shutdown();

        let first = self.signals.mark_complete();
        #[cfg(debug_assertions)]
        debug_assert_single_completion!(first);
        let _ = first;

        if state == SenderState::Live {
            self.sender.shutdown().await;
        }
        tracing::debug!(sender = self.sender.name(), "span stream terminated");
    }
}

/// Sleeps the backoff. Returns `false` if shutdown interrupted it.
///
/// Borrows only the signals so the worker future stays `Send` for senders
/// that are not `Sync`.
async fn back_off(backoff: Duration, signals: &ShutdownSignals) -> bool {
    tokio::select! {
        () = tokio::time::sleep(backoff) => true,
        () = signals.stream_shutdown() => false,
    }
}

async fn next_response(responses: &mut Option<mpsc::Receiver<StreamFailure>>) -> StreamFailure {
    if let Some(rx) = responses.as_mut() {
        if let Some(failure) = rx.recv().await {
            return failure;
        }
        // Source closed: nothing more will arrive for this connection.
        *responses = None;
    }
    std::future::pending().await
}

fn record_failure(metrics: &MetricsHandle, sender: &str, failure: &StreamFailure) {
    if failure.outcome != Outcome::Ok {
        tracing::warn!(
            sender,
            outcome = ?failure.outcome,
            reason = %failure.reason,
            "span stream failure"
        );
        metrics.increment(METRIC_RESPONSE_ERROR, 1.0);
    }
    if let Some(metric) = &failure.metric {
        metrics.increment(metric.as_str(), 1.0);
    }
}
