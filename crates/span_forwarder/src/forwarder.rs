use crate::batch::SpanBatch;
use crate::config::{ForwarderConfig, StreamOptions};
use crate::error::ForwarderError;
use crate::metrics::{MetricsHandle, MetricsSnapshot};
use crate::outcome::{METRIC_QUEUE_DUMPED, METRIC_SEEN};
use crate::queue::{Admission, SpanQueue};
use crate::sender::SpanSender;
use crate::shutdown::ShutdownSignals;
use crate::tcp_sender::TcpSender;
use crate::worker::StreamWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Handle to a running span forwarder.
///
/// Owns no tasks directly: the stream worker and the metrics actor run on the
/// tokio runtime that was current at `start`. Dropping the handle requests
/// application shutdown, which stops both.
///
/// # Example
///
/// ```ignore
/// let config = ForwarderConfig::new("trace-observer.example.com", 443, license, run_id);
/// let forwarder = Forwarder::start(config)?;
///
/// forwarder.enqueue(span_count, encoded_batch);
///
/// let metrics = forwarder.dump_metrics().await;
/// forwarder.shutdown(Duration::from_secs(5)).await?;
/// ```
#[derive(Debug)]
pub struct Forwarder {
    queue: Arc<SpanQueue>,
    metrics: MetricsHandle,
    signals: Arc<ShutdownSignals>,
}

impl Forwarder {
    /// Starts forwarding over the production TCP transport.
    ///
    /// Returns immediately; connecting happens in the background.
    pub fn start(config: ForwarderConfig) -> Result<Self, ForwarderError> {
        config.validate()?;
        let options = StreamOptions::from(&config);
        Self::start_with_sender(TcpSender::new(config), options)
    }

    /// Starts forwarding over any [`SpanSender`].
    pub fn start_with_sender<S: SpanSender>(
        sender: S,
        options: StreamOptions,
    ) -> Result<Self, ForwarderError> {
        let runtime = Handle::try_current().map_err(|_| ForwarderError::NoRuntime)?;

        let signals = Arc::new(ShutdownSignals::new());
        let queue = Arc::new(SpanQueue::new(options.queue_size));
        let (metrics, _metrics_task) = MetricsHandle::spawn(&runtime, Arc::clone(&signals));

        let worker = StreamWorker::new(
            sender,
            Arc::clone(&queue),
            metrics.clone(),
            Arc::clone(&signals),
            options.backoff,
        );
        runtime.spawn(worker.run());

        tracing::debug!(queue_size = options.queue_size, "span forwarder started");

        Ok(Self {
            queue,
            metrics,
            signals,
        })
    }

    /// Offers a batch of `count` spans for streaming.
    ///
    /// Best effort and never blocks: if the batch does not fit, everything
    /// still buffered is dropped to make room. Once shutdown has been
    /// requested the queue is drained and closed and the batch discarded.
    pub fn enqueue(&self, count: u64, payload: Vec<u8>) {
        if self.signals.stream_shutdown_requested() {
            self.close_queue();
            return;
        }

        match self.queue.push(SpanBatch::new(count, payload)) {
            Admission::Closed => {}
            Admission::Accepted { flushed } => {
                self.metrics.increment(METRIC_SEEN, count as f64);
                if let Some(flushed) = flushed
                    && flushed.spans > 0
                {
                    tracing::warn!(
                        batches = flushed.batches,
                        spans = flushed.spans,
                        "span queue full, dropped buffered spans"
                    );
                    self.metrics.increment(METRIC_QUEUE_DUMPED, flushed.spans as f64);
                }
            }
        }
    }

    /// Stops the stream and waits up to `timeout` for it to finish.
    ///
    /// The queue is closed afterwards whether or not the wait succeeded, so
    /// producers are never held up by a stuck transport. Safe to call
    /// repeatedly and from several tasks.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ForwarderError> {
        self.signals.request_stream_shutdown();
        let waited = tokio::time::timeout(timeout, self.signals.completed()).await;
        self.close_queue();
        waited.map_err(|_| ForwarderError::ShutdownTimeout(timeout))
    }

    /// Takes and resets the supportability counters.
    ///
    /// `None` once application shutdown has been requested.
    pub async fn dump_metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.dump().await
    }

    /// Tears everything down, including the metrics actor.
    pub fn request_application_shutdown(&self) {
        if self.signals.request_application_shutdown() {
            tracing::debug!("span forwarder application shutdown requested");
        }
    }

    /// `true` once the stream worker has finished its terminal cleanup.
    pub fn is_complete(&self) -> bool {
        self.signals.is_complete()
    }

    /// Spans that can be enqueued before the next flush.
    pub fn remaining_capacity(&self) -> u64 {
        self.queue.remaining_capacity()
    }

    fn close_queue(&self) {
        if let Some(flushed) = self.queue.close()
            && flushed.spans > 0
        {
            tracing::debug!(
                batches = flushed.batches,
                spans = flushed.spans,
                "span queue closed with data still buffered"
            );
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.signals.request_application_shutdown();
        self.queue.close();
    }
}
