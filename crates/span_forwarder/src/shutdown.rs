//! Shutdown coordination between the producer API, the stream worker, and
//! the metrics actor.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A flag that flips from unset to set exactly once and can be awaited.
///
/// Firing is idempotent: only the first call has any effect, later calls
/// return `false`.
#[derive(Debug, Default)]
pub struct OneShot {
    fired: AtomicBool,
    notify: Notify,
}

impl OneShot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter. Returns `true` on the first call.
    pub fn fire(&self) -> bool {
        let first = self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    #[inline]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the flag is set (immediately if it already is).
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent fire cannot slip between.
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// The three one-shot signals shared by every task of a forwarder.
///
/// Stream shutdown and application shutdown are separate authorities: the
/// stream worker may stop (permanent protocol error, explicit `shutdown`)
/// while the metrics actor keeps serving dumps until the application itself
/// is torn down.
#[derive(Debug, Default)]
pub struct ShutdownSignals {
    stream: OneShot,
    application: OneShot,
    complete: OneShot,
}

impl ShutdownSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the stream worker to exit at its next suspension point.
    pub fn request_stream_shutdown(&self) -> bool {
        self.stream.fire()
    }

    #[inline]
    pub fn stream_shutdown_requested(&self) -> bool {
        self.stream.is_fired()
    }

    pub async fn stream_shutdown(&self) {
        self.stream.wait().await;
    }

    /// Tears down the whole subsystem: the metrics actor and the stream.
    pub fn request_application_shutdown(&self) -> bool {
        let first = self.application.fire();
        self.stream.fire();
        first
    }

    #[inline]
    pub fn application_shutdown_requested(&self) -> bool {
        self.application.is_fired()
    }

    pub async fn application_shutdown(&self) {
        self.application.wait().await;
    }

    /// Set by the stream worker once its terminal cleanup has run.
    pub fn mark_complete(&self) -> bool {
        self.complete.fire()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete.is_fired()
    }

    pub async fn completed(&self) {
        self.complete.wait().await;
    }
}
