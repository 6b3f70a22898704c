//! Span Batch Streaming Forwarder
//!
//! Forwards pre-encoded batches of trace spans from an instrumented process
//! to a remote trace-observer over a long-lived stream. Producers hand over
//! batches without blocking; a single background worker keeps the stream
//! open, reconnects according to a status-code policy, and accounts every
//! batch in supportability metrics.
//!
//! # Pieces
//!
//! - [`SpanQueue`]: bounded, best-effort buffer. A batch that does not fit
//!   flushes everything still buffered instead of blocking the producer.
//! - [`SpanSender`]: the transport seam. [`TcpSender`] is the production
//!   implementation; tests plug in scripted senders.
//! - [`MetricsHandle`]: actor-owned counters with destructive dumps.
//! - [`ShutdownSignals`]: stream, application and completion signals shared
//!   by everything above.
//! - [`Forwarder`]: the public handle tying it together.
//!
//! # Rust 2024 Edition Features
//!
//! [`SpanSender`] uses native async fn in traits (no `#[async_trait]`), and
//! the worker is generic over it, so the send path is never boxed.

pub mod batch;
pub mod config;
pub mod error;
pub mod forwarder;
mod invariants;
pub mod metrics;
pub mod outcome;
pub mod queue;
pub mod sender;
pub mod shutdown;
pub mod tcp_sender;
mod worker;

// Re-export main types
pub use batch::SpanBatch;
pub use config::{ForwarderConfig, StreamOptions};
pub use error::{ConfigError, ForwarderError, SenderError, StreamFailure};
pub use forwarder::Forwarder;
pub use metrics::{MetricsHandle, MetricsSnapshot};
pub use outcome::{
    METRIC_QUEUE_DUMPED, METRIC_RESPONSE_ERROR, METRIC_SEEN, METRIC_SENT, Outcome, StatusCode,
};
pub use queue::{Admission, Flushed, SpanQueue};
pub use sender::SpanSender;
pub use shutdown::{OneShot, ShutdownSignals};
pub use tcp_sender::TcpSender;
