//! Span Queue - bounded buffer with a proactive drop policy
//!
//! The queue sits between the producer (`Forwarder::enqueue`) and the stream
//! worker. Capacity is measured in logical spans, not batches: every batch
//! reserves its `count` on admission and gives it back when the worker
//! acknowledges it (sent or failed) or when it is flushed.
//!
//! # Drop Policy
//!
//! When a new batch does not fit, the queue does not wait for the worker.
//! It discards everything still buffered and admits the new batch:
//!
//! ```text
//!  push(7) with 5 spans free
//!  ┌─────┬─────┬─────┐            ┌─────┐
//!  │ b1  │ b2  │ b3  │  ──flush─► │ b4  │   dropped = count(b1..b3)
//!  └─────┴─────┴─────┘            └─────┘
//! ```
//!
//! Dropping the oldest data as a block keeps what remains contiguous, so the
//! next batches the worker sees belong to whole, recent traces instead of a
//! mix of stale and fresh fragments.
//!
//! Batches already handed to the worker still hold their capacity until they
//! are acknowledged, so a flush cannot free more than what is buffered.
//!
//! This type is pure bookkeeping: it does not record metrics or log. The
//! caller turns [`Admission`] into supportability metrics.

#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_capacity_bounded, debug_assert_flush_restored};
use crate::batch::SpanBatch;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// What a flush threw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flushed {
    pub batches: usize,
    pub spans: u64,
}

/// Result of offering a batch to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The batch was buffered. `flushed` is set when older batches had to be
    /// discarded to make room.
    Accepted { flushed: Option<Flushed> },
    /// The queue is closed; the batch was discarded.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<SpanBatch>,
    /// Spans buffered plus spans handed out but not yet acknowledged.
    in_use: u64,
    closed: bool,
}

/// Span-count-bounded FIFO shared by the producer and the stream worker.
///
/// All state sits behind one mutex, so the capacity counter and the buffer
/// can never disagree, even with several producers.
#[derive(Debug)]
pub struct SpanQueue {
    state: Mutex<QueueState>,
    data_notify: Notify,
    queue_size: u64,
}

impl SpanQueue {
    /// Creates a queue holding at most `queue_size` spans.
    pub fn new(queue_size: u64) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            data_notify: Notify::new(),
            queue_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffers a batch, flushing older batches first if it does not fit.
    ///
    /// Never blocks beyond the internal critical section.
    pub fn push(&self, batch: SpanBatch) -> Admission {
        let mut state = self.lock();
        if state.closed {
            return Admission::Closed;
        }

        let count = batch.count();
        let flushed = if self.remaining(&state) < count {
            Some(Self::drain_locked(&mut state))
        } else {
            None
        };

        state.in_use = state.in_use.saturating_add(count);
        state.pending.push_back(batch);

        #[cfg(debug_assertions)]
        debug_assert_capacity_bounded!(self.remaining(&state), self.queue_size);

        drop(state);
        self.data_notify.notify_one();
        Admission::Accepted { flushed }
    }

    /// Closes the queue and drops whatever is still buffered.
    ///
    /// Returns `None` if the queue was already closed, so callers can log the
    /// drain exactly once.
    pub fn close(&self) -> Option<Flushed> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        let flushed = Self::drain_locked(&mut state);
        drop(state);

        // Wake the worker so it can observe the closed state.
        self.data_notify.notify_waiters();
        self.data_notify.notify_one();
        Some(flushed)
    }

    /// Waits for the next batch in FIFO order.
    ///
    /// Resolves to `None` once the queue is closed. Cancel-safe: a batch is
    /// only removed in the same poll that returns it.
    pub async fn next_batch(&self) -> Option<SpanBatch> {
        loop {
            let notified = self.data_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(batch) = state.pending.pop_front() {
                    return Some(batch);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Returns capacity held by a batch that has left the queue.
    pub fn acknowledge(&self, count: u64) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(count);
    }

    /// Spans that can still be admitted without a flush.
    pub fn remaining_capacity(&self) -> u64 {
        self.remaining(&self.lock())
    }

    /// Number of buffered batches.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn queue_size(&self) -> u64 {
        self.queue_size
    }

    #[inline]
    fn remaining(&self, state: &QueueState) -> u64 {
        self.queue_size.saturating_sub(state.in_use)
    }

    fn drain_locked(state: &mut QueueState) -> Flushed {
        #[cfg(debug_assertions)]
        let before = state.in_use;

        let mut flushed = Flushed::default();
        for batch in state.pending.drain(..) {
            flushed.batches += 1;
            flushed.spans += batch.count();
        }
        state.in_use = state.in_use.saturating_sub(flushed.spans);

        #[cfg(debug_assertions)]
        debug_assert_flush_restored!(before, flushed.spans, state.in_use);

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn batch(count: u64, tag: u8) -> SpanBatch {
        SpanBatch::new(count, vec![tag; 3])
    }

    #[test]
    fn test_push_reserves_capacity() {
        let queue = SpanQueue::new(10);
        assert_eq!(queue.push(batch(4, 1)), Admission::Accepted { flushed: None });
        assert_eq!(queue.remaining_capacity(), 6);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_overflow_flushes_all_buffered() {
        let queue = SpanQueue::new(10);
        queue.push(batch(4, 1));
        queue.push(batch(4, 2));

        let admission = queue.push(batch(5, 3));
        assert_eq!(
            admission,
            Admission::Accepted {
                flushed: Some(Flushed { batches: 2, spans: 8 })
            }
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.remaining_capacity(), 5);
    }

    #[test]
    fn test_acknowledge_returns_capacity() {
        let queue = SpanQueue::new(10);
        queue.push(batch(6, 1));
        // Still counts against capacity while in flight.
        let in_flight = queue.lock().pending.pop_front().unwrap();
        assert_eq!(queue.remaining_capacity(), 4);

        queue.acknowledge(in_flight.count());
        assert_eq!(queue.remaining_capacity(), 10);
    }

    #[test]
    fn test_flush_cannot_free_in_flight_capacity() {
        let queue = SpanQueue::new(10);
        queue.push(batch(8, 1));
        let _in_flight = queue.lock().pending.pop_front().unwrap();

        // Nothing buffered to drop; the batch is admitted anyway.
        let admission = queue.push(batch(5, 2));
        assert_eq!(
            admission,
            Admission::Accepted {
                flushed: Some(Flushed::default())
            }
        );
        assert_eq!(queue.remaining_capacity(), 0);
    }

    #[test]
    fn test_close_drains_once() {
        let queue = SpanQueue::new(10);
        queue.push(batch(3, 1));
        queue.push(batch(2, 2));

        assert_eq!(queue.close(), Some(Flushed { batches: 2, spans: 5 }));
        assert_eq!(queue.close(), None);
        assert_eq!(queue.push(batch(1, 3)), Admission::Closed);
        assert!(queue.is_empty());
        assert_eq!(queue.remaining_capacity(), 10);
    }

    #[tokio::test]
    async fn test_next_batch_is_fifo() {
        let queue = SpanQueue::new(100);
        for tag in 0..5 {
            queue.push(batch(1, tag));
        }
        for tag in 0..5 {
            let next = queue.next_batch().await.unwrap();
            assert_eq!(next.payload(), &[tag; 3]);
        }
    }

    #[tokio::test]
    async fn test_next_batch_wakes_on_push() {
        let queue = Arc::new(SpanQueue::new(100));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_batch().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(batch(2, 9));

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer not woken")
            .unwrap();
        assert_eq!(received.map(|b| b.count()), Some(2));
    }

    #[tokio::test]
    async fn test_next_batch_returns_none_after_close() {
        let queue = Arc::new(SpanQueue::new(100));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_batch().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer not woken by close")
            .unwrap();
        assert!(received.is_none());
    }
}
