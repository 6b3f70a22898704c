//! Connection outcomes, transport status codes, and supportability metric names.
//!
//! Every connect, send, and asynchronous response event is reduced to one
//! [`Outcome`]. The stream worker only ever reacts to outcomes; the mapping
//! from transport status codes to outcomes lives in [`StatusCode::outcome`].

/// Spans successfully handed to the transport.
pub const METRIC_SENT: &str = "Supportability/InfiniteTracing/Span/Sent";
/// Spans accepted by `enqueue`.
pub const METRIC_SEEN: &str = "Supportability/InfiniteTracing/Span/Seen";
/// Any failure reported by connect, send, or the response source.
pub const METRIC_RESPONSE_ERROR: &str = "Supportability/InfiniteTracing/Span/Response/Error";
/// Spans discarded by a queue flush.
pub const METRIC_QUEUE_DUMPED: &str = "Supportability/InfiniteTracing/Span/AgentQueueDumped";

const METRIC_STATUS_PREFIX: &str = "Supportability/InfiniteTracing/Span/gRPC/";

/// What the stream worker does after a connect/send/response event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Benign signal from the response source; keep streaming.
    Ok,
    /// Permanent failure; stop forwarding.
    Shutdown,
    /// Transient failure; back off, then reconnect with the same sender.
    Restart,
    /// Topology changed; replace the sender with a freshly resolved clone.
    Reconnect,
    /// The stream ended cleanly; reconnect right away.
    ImmediateRestart,
}

/// Status codes carried by the ingest stream (the gRPC code space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// Decodes a wire code; anything out of range is `Unknown`.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Canonical upper-case name, used verbatim in metric names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Default policy mapping a status code to the worker's next move.
    ///
    /// - `UNIMPLEMENTED`: the endpoint does not speak this protocol, stop.
    /// - `FAILED_PRECONDITION`: the endpoint moved, re-resolve it.
    /// - `OK`: the server closed the stream cleanly, reopen it now.
    /// - everything else: transient, back off and retry.
    pub fn outcome(self) -> Outcome {
        match self {
            Self::Unimplemented => Outcome::Shutdown,
            Self::FailedPrecondition => Outcome::Reconnect,
            Self::Ok => Outcome::ImmediateRestart,
            _ => Outcome::Restart,
        }
    }

    /// `Supportability/InfiniteTracing/Span/gRPC/<CODE>`.
    pub fn metric_name(self) -> String {
        format!("{METRIC_STATUS_PREFIX}{}", self.as_str())
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
