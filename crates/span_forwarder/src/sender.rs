use crate::batch::SpanBatch;
use crate::error::{SenderError, StreamFailure};
use std::future::Future;
use tokio::sync::mpsc;

/// Transport capability set driven by the stream worker.
///
/// Uses native async fn in traits instead of `#[async_trait]`. The worker is
/// generic over the sender, so no boxing is needed.
///
/// Implementations own their transport timeouts and the policy that maps
/// transport errors to [`Outcome`](crate::Outcome)s; the worker only reacts
/// to the classified [`StreamFailure`].
pub trait SpanSender: Send + Sized + 'static {
    /// Opens the stream. May be called again after any failure.
    fn connect(&mut self) -> impl Future<Output = Result<(), StreamFailure>> + Send;

    /// Transmits one batch over the open stream.
    fn send(&mut self, batch: SpanBatch) -> impl Future<Output = Result<(), StreamFailure>> + Send;

    /// Takes the asynchronous outcome source for the stream opened by the
    /// last successful `connect`.
    ///
    /// Failures detected outside the send path (a server-initiated stream
    /// error, a closed connection) arrive here. Returns `None` if the sender
    /// has no such source or it was already taken.
    fn take_responses(&mut self) -> Option<mpsc::Receiver<StreamFailure>>;

    /// Releases the connection, giving in-flight data a grace period.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;

    /// Builds an equivalent sender that will resolve its endpoint afresh.
    fn clone_sender(&self) -> Result<Self, SenderError>;

    /// Returns the sender name for logs.
    fn name(&self) -> &str;
}
