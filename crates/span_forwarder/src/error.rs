//! Error types for span forwarding operations.

use crate::outcome::{Outcome, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the public [`Forwarder`](crate::Forwarder) API.
///
/// Transport problems never show up here; they are absorbed into metrics and
/// state transitions inside the stream worker.
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// The stream worker did not finish within the caller's shutdown bound.
    #[error("timed out after {0:?} waiting for span stream shutdown")]
    ShutdownTimeout(Duration),

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to spawn the span stream")]
    NoRuntime,

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must not be zero")]
    ZeroPort,

    #[error("license must not be empty")]
    EmptyLicense,

    #[error("run id must not be empty")]
    EmptyRunId,

    #[error("queue size must be greater than zero")]
    ZeroQueueSize,

    #[error("malformed configuration: {0}")]
    Malformed(String),
}

/// Failure to produce a fresh sender instance during a reconnect.
#[derive(Debug, Clone, Error)]
#[error("failed to clone span sender: {0}")]
pub struct SenderError(pub String);

/// A transport failure, already classified into the outcome it should drive.
///
/// Produced by every failing connect/send call and by the sender's
/// asynchronous response source.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{outcome:?}: {reason}")]
pub struct StreamFailure {
    /// What the stream worker should do next.
    pub outcome: Outcome,
    /// Supportability metric to bump by one, if any.
    pub metric: Option<String>,
    /// Human-readable cause for logs.
    pub reason: String,
}

impl StreamFailure {
    /// Creates a failure with an explicit outcome and metric.
    pub fn new(outcome: Outcome, metric: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            metric,
            reason: reason.into(),
        }
    }

    /// Classifies a transport status code using the default policy.
    pub fn from_status(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            outcome: code.outcome(),
            metric: Some(code.metric_name()),
            reason: reason.into(),
        }
    }
}
